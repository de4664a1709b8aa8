//! Host-side expansion of device error messages.
//!
//! Device code only records a printf-style format string and the raw bytes
//! of each argument. Expansion happens here, after the launch, where the
//! byte size recorded for each argument decides how it is read back: a `%d`
//! fed 8 bytes is an `i64`, fed 2 bytes an `i16`. Length modifiers in the
//! format (`l`, `ll`, `h`, ...) are accepted and ignored.
//!
//! Field width and precision are capped at [`OUT_STRING_LEN`], and so is the
//! expanded message.

use crate::exception::OUT_STRING_LEN;

/// Expands `format` with the arguments packed in `args` (sizes in `sizes`).
///
/// Conversions without a matching argument are copied through verbatim.
pub fn format_device_message(format: &str, sizes: &[u32], args: &[u8]) -> String {
    let mut out = String::with_capacity(format.len() * 2);
    let mut cursor = ArgCursor { sizes, args, next: 0, offset: 0 };
    let bytes = format.as_bytes();
    let mut literal_start = 0;
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'%' {
            i += 1;
            continue;
        }
        out.push_str(&format[literal_start..i]);
        match Spec::parse(&bytes[i + 1..]) {
            Some((spec, consumed)) => {
                let end = i + 1 + consumed;
                if spec.conversion == b'%' {
                    out.push('%');
                } else {
                    match cursor.next_arg() {
                        Some(arg) => spec.render(arg, &mut out),
                        None => out.push_str(&format[i..end]),
                    }
                }
                i = end;
            }
            None => {
                out.push('%');
                i += 1;
            }
        }
        literal_start = i;
    }
    out.push_str(&format[literal_start..]);
    if out.len() > OUT_STRING_LEN {
        let mut end = OUT_STRING_LEN;
        while !out.is_char_boundary(end) {
            end -= 1;
        }
        out.truncate(end);
    }
    out
}

/// Walks the packed argument buffer.
struct ArgCursor<'a> {
    sizes: &'a [u32],
    args: &'a [u8],
    next: usize,
    offset: usize,
}

impl<'a> ArgCursor<'a> {
    fn next_arg(&mut self) -> Option<&'a [u8]> {
        let size = *self.sizes.get(self.next)? as usize;
        let arg = self.args.get(self.offset..self.offset + size)?;
        self.next += 1;
        self.offset += size;
        Some(arg)
    }
}

/// One parsed conversion specification.
#[derive(Debug, Default, Clone, Copy)]
struct Spec {
    left: bool,
    zero: bool,
    plus: bool,
    space: bool,
    alternate: bool,
    width: Option<usize>,
    precision: Option<usize>,
    conversion: u8,
}

impl Spec {
    /// Parses the text after a `%`; returns the spec and the bytes consumed.
    fn parse(rest: &[u8]) -> Option<(Spec, usize)> {
        let mut spec = Spec::default();
        let mut i = 0;

        while let Some(&c) = rest.get(i) {
            match c {
                b'-' => spec.left = true,
                b'0' => spec.zero = true,
                b'+' => spec.plus = true,
                b' ' => spec.space = true,
                b'#' => spec.alternate = true,
                _ => break,
            }
            i += 1;
        }

        let (width, used) = parse_number(&rest[i..]);
        spec.width = width;
        i += used;

        if rest.get(i) == Some(&b'.') {
            i += 1;
            let (precision, used) = parse_number(&rest[i..]);
            spec.precision = Some(precision.unwrap_or(0));
            i += used;
        }

        while let Some(&c) = rest.get(i) {
            if matches!(c, b'h' | b'l' | b'z' | b'j' | b't' | b'L' | b'q') {
                i += 1;
            } else {
                break;
            }
        }

        let conversion = *rest.get(i)?;
        if !b"diouxXfFeEgGcsp%".contains(&conversion) {
            return None;
        }
        spec.conversion = conversion;
        Some((spec, i + 1))
    }

    fn render(&self, arg: &[u8], out: &mut String) {
        match self.conversion {
            b'd' | b'i' => {
                let value = read_signed(arg);
                let sign = if value < 0 {
                    "-"
                } else if self.plus {
                    "+"
                } else if self.space {
                    " "
                } else {
                    ""
                };
                let digits = self.int_digits(value.unsigned_abs().to_string());
                self.pad_numeric(sign, &digits, out);
            }
            b'u' => {
                let digits = self.int_digits(read_unsigned(arg).to_string());
                self.pad_numeric("", &digits, out);
            }
            b'o' => {
                let value = read_unsigned(arg);
                let prefix = if self.alternate && value != 0 { "0" } else { "" };
                let digits = self.int_digits(format!("{value:o}"));
                self.pad_numeric(prefix, &digits, out);
            }
            b'x' | b'X' => {
                let value = read_unsigned(arg);
                let upper = self.conversion == b'X';
                let prefix = match (self.alternate && value != 0, upper) {
                    (true, false) => "0x",
                    (true, true) => "0X",
                    _ => "",
                };
                let digits = if upper { format!("{value:X}") } else { format!("{value:x}") };
                let digits = self.int_digits(digits);
                self.pad_numeric(prefix, &digits, out);
            }
            b'p' => {
                let digits = format!("{:x}", read_unsigned(arg));
                self.pad_numeric("0x", &digits, out);
            }
            b'f' | b'F' | b'e' | b'E' | b'g' | b'G' => {
                let value = read_float(arg);
                let sign = if value.is_sign_negative() && !value.is_nan() {
                    "-"
                } else if self.plus {
                    "+"
                } else if self.space {
                    " "
                } else {
                    ""
                };
                let body = self.float_body(value.abs());
                if value.is_finite() {
                    self.pad_numeric(sign, &body, out);
                } else {
                    self.pad_text(&format!("{sign}{body}"), out);
                }
            }
            b'c' => {
                let c = char::from_u32(read_unsigned(arg) as u32).unwrap_or(char::REPLACEMENT_CHARACTER);
                self.pad_text(&c.to_string(), out);
            }
            b's' => {
                let text = String::from_utf8_lossy(arg);
                let text = text.trim_end_matches('\0');
                let text: String = match self.precision {
                    Some(p) => text.chars().take(p).collect(),
                    None => text.to_string(),
                };
                self.pad_text(&text, out);
            }
            _ => {}
        }
    }

    /// Applies integer precision (minimum digit count).
    fn int_digits(&self, digits: String) -> String {
        match self.precision {
            Some(0) if digits == "0" => String::new(),
            Some(p) if digits.len() < p => format!("{}{}", "0".repeat(p - digits.len()), digits),
            _ => digits,
        }
    }

    fn float_body(&self, value: f64) -> String {
        let upper = self.conversion.is_ascii_uppercase();
        if value.is_nan() {
            return if upper { "NAN".into() } else { "nan".into() };
        }
        if value.is_infinite() {
            return if upper { "INF".into() } else { "inf".into() };
        }
        let precision = self.precision.unwrap_or(6);
        let body = match self.conversion.to_ascii_lowercase() {
            b'f' => format!("{value:.precision$}"),
            b'e' => c_exponent(value, precision),
            _ => {
                // %g: choose %e or %f by the decimal exponent
                let p = precision.max(1);
                let sci = format!("{value:.prec$e}", prec = p - 1);
                let exponent: i32 = sci
                    .split_once('e')
                    .and_then(|(_, e)| e.parse().ok())
                    .unwrap_or(0);
                let rendered = if exponent < -4 || exponent >= p as i32 {
                    c_exponent(value, p - 1)
                } else {
                    let decimals = (p as i32 - 1 - exponent).max(0) as usize;
                    format!("{value:.decimals$}")
                };
                if self.alternate {
                    rendered
                } else {
                    strip_trailing_zeros(&rendered)
                }
            }
        };
        if upper {
            body.to_ascii_uppercase()
        } else {
            body
        }
    }

    /// Pads `prefix` + `digits` to the field width.
    fn pad_numeric(&self, prefix: &str, digits: &str, out: &mut String) {
        let len = prefix.len() + digits.len();
        let fill = self.width.unwrap_or(0).saturating_sub(len);
        let zero_pad = self.zero && !self.left && (self.precision.is_none() || self.is_float());
        if self.left {
            out.push_str(prefix);
            out.push_str(digits);
            out.push_str(&" ".repeat(fill));
        } else if zero_pad {
            out.push_str(prefix);
            out.push_str(&"0".repeat(fill));
            out.push_str(digits);
        } else {
            out.push_str(&" ".repeat(fill));
            out.push_str(prefix);
            out.push_str(digits);
        }
    }

    fn pad_text(&self, text: &str, out: &mut String) {
        let fill = self.width.unwrap_or(0).saturating_sub(text.chars().count());
        if self.left {
            out.push_str(text);
            out.push_str(&" ".repeat(fill));
        } else {
            out.push_str(&" ".repeat(fill));
            out.push_str(text);
        }
    }

    fn is_float(&self) -> bool {
        matches!(self.conversion, b'f' | b'F' | b'e' | b'E' | b'g' | b'G')
    }
}

fn parse_number(bytes: &[u8]) -> (Option<usize>, usize) {
    let len = bytes.iter().take_while(|b| b.is_ascii_digit()).count();
    if len == 0 {
        return (None, 0);
    }
    let value = bytes[..len]
        .iter()
        .fold(0usize, |acc, b| acc.saturating_mul(10).saturating_add((b - b'0') as usize));
    (Some(value.min(OUT_STRING_LEN)), len)
}

/// `d.ddde+XX` with at least two exponent digits.
fn c_exponent(value: f64, precision: usize) -> String {
    let rust = format!("{value:.precision$e}");
    let (mantissa, exponent) = rust.split_once('e').unwrap_or((rust.as_str(), "0"));
    let exponent: i32 = exponent.parse().unwrap_or(0);
    let sign = if exponent < 0 { '-' } else { '+' };
    format!("{mantissa}e{sign}{:02}", exponent.unsigned_abs())
}

fn strip_trailing_zeros(rendered: &str) -> String {
    let (mantissa, exponent) = match rendered.find('e') {
        Some(pos) => rendered.split_at(pos),
        None => (rendered, ""),
    };
    let mantissa = if mantissa.contains('.') {
        mantissa.trim_end_matches('0').trim_end_matches('.')
    } else {
        mantissa
    };
    format!("{mantissa}{exponent}")
}

fn widen(arg: &[u8]) -> [u8; 8] {
    let mut raw = [0u8; 8];
    let n = arg.len().min(8);
    raw[..n].copy_from_slice(&arg[..n]);
    raw
}

fn read_unsigned(arg: &[u8]) -> u64 {
    match arg.len() {
        1 => arg[0] as u64,
        2 => u16::from_ne_bytes([arg[0], arg[1]]) as u64,
        4 => {
            let raw = widen(arg);
            u32::from_ne_bytes([raw[0], raw[1], raw[2], raw[3]]) as u64
        }
        _ => u64::from_ne_bytes(widen(arg)),
    }
}

fn read_signed(arg: &[u8]) -> i64 {
    let raw = read_unsigned(arg);
    match arg.len() {
        1 => raw as u8 as i8 as i64,
        2 => raw as u16 as i16 as i64,
        4 => raw as u32 as i32 as i64,
        _ => raw as i64,
    }
}

fn read_float(arg: &[u8]) -> f64 {
    match arg.len() {
        4 => f32::from_bits(read_unsigned(arg) as u32) as f64,
        _ => f64::from_bits(read_unsigned(arg)),
    }
}
