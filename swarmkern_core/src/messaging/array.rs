//! Array messages: a fixed-length list where each message owns one bin.
//!
//! An output agent declares the bin of its message with
//! [`ArrayOut::set_index`]. After the launch, [`ArrayMessageHandler`]
//! scatters every live candidate straight into its bin. Readers then access
//! a bin directly ([`ArrayIn::at`]) or walk a wrapped 1-D window around an
//! origin ([`ArrayIn::filter`]).
//!
//! A bin claimed by two candidates is a collision; a bin claimed by none is
//! a gap. Both are reported as device errors.

use super::{BuildReport, ChannelContext, MessageSpecialisationHandler, Messaging};
use crate::buffer::{zero, DeviceBuffer, DeviceType};
use crate::curve::{
    is_reserved, variable_hash, CurveTable, NamespaceHash, VariableDescriptor, INDEX_VARIABLE_NAME,
};
use crate::dthrow;
use crate::error::{CoreError, CoreResult};
use crate::exception::{DeviceExceptionBuffer, DeviceThread};
use crate::scan::ScanFlags;
use crate::store::VariableStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use swarmkern_env::DeviceContext;
use tracing::{debug, warn};

/// Array message type.
#[derive(Debug, Clone, Copy, Default)]
pub struct MsgArray;

/// Metadata passed to array channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArrayMetaData {
    /// Number of bins
    pub length: u32,
}

impl Messaging for MsgArray {
    type MetaData = ArrayMetaData;
    type In<'a> = ArrayIn<'a>;
    type Out<'a> = ArrayOut<'a>;

    fn input<'a>(ctx: ChannelContext<'a>, metadata: &'a ArrayMetaData) -> ArrayIn<'a> {
        ArrayIn {
            ctx,
            length: metadata.length,
        }
    }

    fn output<'a>(
        ctx: ChannelContext<'a>,
        metadata: &'a ArrayMetaData,
        flags: &'a ScanFlags,
    ) -> ArrayOut<'a> {
        ArrayOut {
            ctx,
            length: metadata.length,
            flags,
        }
    }
}

// ============================================================================
// DEVICE: OUTPUT
// ============================================================================

/// Writes this thread's candidate message.
#[derive(Clone, Copy)]
pub struct ArrayOut<'a> {
    ctx: ChannelContext<'a>,
    length: u32,
    flags: &'a ScanFlags,
}

impl<'a> ArrayOut<'a> {
    /// Declares the bin this thread's message should occupy and marks the
    /// message as live.
    pub fn set_index(&self, index: u32) {
        let thread = self.ctx.thread;
        if index >= self.length {
            dthrow!(thread, "MsgArray index [%u] is out of bounds [%u]", index, self.length);
        }
        self.ctx.curve.set_variable(
            &thread,
            self.ctx.combined_hash(),
            INDEX_VARIABLE_NAME,
            thread.index(),
            index,
        );
        self.flags.set(thread.index());
    }

    /// Sets a field of this thread's message. Reserved names are ignored.
    pub fn set_variable<T: DeviceType>(&self, name: &str, value: T) {
        if is_reserved(name) {
            return;
        }
        let thread = self.ctx.thread;
        self.ctx
            .curve
            .set_variable(&thread, self.ctx.combined_hash(), name, thread.index(), value);
    }

    /// Sets one element of an array field of this thread's message.
    pub fn set_array_variable<T: DeviceType>(&self, name: &str, element: u32, value: T) {
        if is_reserved(name) {
            return;
        }
        let thread = self.ctx.thread;
        self.ctx.curve.set_array_variable(
            &thread,
            self.ctx.combined_hash(),
            name,
            thread.index(),
            element,
            value,
        );
    }
}

// ============================================================================
// DEVICE: INPUT
// ============================================================================

/// Reads the built list.
#[derive(Clone, Copy)]
pub struct ArrayIn<'a> {
    ctx: ChannelContext<'a>,
    length: u32,
}

impl<'a> ArrayIn<'a> {
    /// Number of bins.
    pub fn size(&self) -> u32 {
        self.length
    }

    /// The message in bin `index`.
    pub fn at(&self, index: u32) -> ArrayMessage<'a> {
        if index >= self.length {
            dthrow!(
                self.ctx.thread,
                "Index is out of bounds for Array messagelist (%u >= %u).",
                index,
                self.length
            );
        }
        ArrayMessage {
            ctx: self.ctx,
            length: self.length,
            index,
        }
    }

    /// The `2 * radius` messages around `origin`, wrapping at the ends and
    /// excluding `origin` itself.
    ///
    /// Iteration stops at the first bin equal to [`ArrayFilter::end`]. When
    /// `2 * radius + 1 >= size()` that bin is reached early and the window is
    /// cut short, except for `radius == size() - 1`, which visits every other
    /// bin twice.
    pub fn filter(&self, origin: u32, radius: u32) -> ArrayFilter<'a> {
        if radius == 0 || radius > self.length {
            dthrow!(
                self.ctx.thread,
                "Invalid radius %u for accessing array messagelist of length %u",
                radius,
                self.length
            );
        }
        ArrayFilter {
            ctx: self.ctx,
            length: self.length,
            origin,
            radius,
        }
    }

    /// Shorthand for `filter(origin, 1)`.
    pub fn neighbours(&self, origin: u32) -> ArrayFilter<'a> {
        self.filter(origin, 1)
    }
}

/// One bin of the list.
#[derive(Clone, Copy)]
pub struct ArrayMessage<'a> {
    ctx: ChannelContext<'a>,
    length: u32,
    index: u32,
}

impl<'a> ArrayMessage<'a> {
    pub fn get_index(&self) -> u32 {
        self.index
    }

    /// Reads a field; zero if the bin is out of range.
    pub fn get_variable<T: DeviceType>(&self, name: &str) -> T {
        if self.index < self.length {
            self.ctx
                .curve
                .get_variable(&self.ctx.thread, self.ctx.combined_hash(), name, self.index)
        } else {
            zero()
        }
    }

    pub fn get_array_variable<T: DeviceType>(&self, name: &str, element: u32) -> T {
        if self.index < self.length {
            self.ctx.curve.get_array_variable(
                &self.ctx.thread,
                self.ctx.combined_hash(),
                name,
                self.index,
                element,
            )
        } else {
            zero()
        }
    }
}

/// A wrapped window of the list around an origin.
#[derive(Clone, Copy)]
pub struct ArrayFilter<'a> {
    ctx: ChannelContext<'a>,
    length: u32,
    origin: u32,
    radius: u32,
}

impl<'a> ArrayFilter<'a> {
    /// Iterator positioned on the first neighbour.
    pub fn begin(&self) -> ArrayFilterIter<'a> {
        ArrayFilterIter::new(*self, -(self.radius as i64) - 1)
    }

    /// Sentinel one past the last neighbour.
    pub fn end(&self) -> ArrayFilterIter<'a> {
        ArrayFilterIter::new(*self, self.radius as i64)
    }

    pub fn origin(&self) -> u32 {
        self.origin
    }

    pub fn radius(&self) -> u32 {
        self.radius
    }
}

impl<'a> IntoIterator for ArrayFilter<'a> {
    type Item = ArrayFilterMessage<'a>;
    type IntoIter = ArrayFilterIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.begin()
    }
}

impl<'a> IntoIterator for &ArrayFilter<'a> {
    type Item = ArrayFilterMessage<'a>;
    type IntoIter = ArrayFilterIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.begin()
    }
}

/// Cursor over an [`ArrayFilter`].
///
/// Equality compares the current bin and the search origin only.
#[derive(Clone, Copy)]
pub struct ArrayFilterIter<'a> {
    filter: ArrayFilter<'a>,
    relative: i64,
    index: u32,
}

impl<'a> ArrayFilterIter<'a> {
    /// Starts at `relative` and advances once.
    fn new(filter: ArrayFilter<'a>, relative: i64) -> Self {
        let mut iter = Self {
            filter,
            relative,
            index: 0,
        };
        iter.advance();
        iter
    }

    fn advance(&mut self) {
        self.relative += 1;
        if self.relative == 0 {
            self.relative += 1;
        }
        let length = self.filter.length.max(1) as i64;
        let absolute = self.filter.origin as i64 + self.relative + length;
        self.index = absolute.rem_euclid(length) as u32;
    }

    /// Bin the cursor points at.
    pub fn index(&self) -> u32 {
        self.index
    }
}

impl PartialEq for ArrayFilterIter<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.filter.origin == other.filter.origin
    }
}

impl<'a> Iterator for ArrayFilterIter<'a> {
    type Item = ArrayFilterMessage<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if *self == self.filter.end() {
            return None;
        }
        let message = ArrayFilterMessage {
            ctx: self.filter.ctx,
            length: self.filter.length,
            index: self.index,
            relative: self.relative as i32,
        };
        self.advance();
        Some(message)
    }
}

/// A message reached through an [`ArrayFilter`].
#[derive(Clone, Copy)]
pub struct ArrayFilterMessage<'a> {
    ctx: ChannelContext<'a>,
    length: u32,
    index: u32,
    relative: i32,
}

impl<'a> ArrayFilterMessage<'a> {
    /// Bin of this message.
    pub fn get_x(&self) -> u32 {
        self.index
    }

    /// Signed distance from the search origin.
    pub fn relative(&self) -> i32 {
        self.relative
    }

    pub fn get_variable<T: DeviceType>(&self, name: &str) -> T {
        if self.index < self.length {
            self.ctx
                .curve
                .get_variable(&self.ctx.thread, self.ctx.combined_hash(), name, self.index)
        } else {
            zero()
        }
    }
}

// ============================================================================
// HOST: BUILD
// ============================================================================

/// Host side of one array message list.
///
/// Owns the candidate store (one slot per output thread) and the built list
/// (one slot per bin). Both carry the model's variables plus `___INDEX`.
#[derive(Debug)]
pub struct ArrayMessageHandler {
    name: String,
    length: u32,
    candidates: VariableStore,
    messages: VariableStore,
    metadata: Option<ArrayMetaData>,
    write_flags: Option<ScanFlags>,
}

impl ArrayMessageHandler {
    /// Declares a list of `length` bins holding `variables`.
    pub fn new(
        name: impl Into<String>,
        length: u32,
        variables: Vec<VariableDescriptor>,
    ) -> CoreResult<Self> {
        let name = name.into();
        if length == 0 {
            return Err(CoreError::ZeroLengthMessageList(name));
        }
        if let Some(reserved) = variables.iter().find(|v| is_reserved(v.name())) {
            return Err(CoreError::ReservedName(reserved.name().to_string()));
        }
        let mut descriptors = variables;
        descriptors.push(VariableDescriptor::scalar::<u32>(INDEX_VARIABLE_NAME));
        Ok(Self {
            candidates: VariableStore::new(0, descriptors.clone())?,
            messages: VariableStore::new(length, descriptors)?,
            name,
            length,
            metadata: None,
            write_flags: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn length(&self) -> u32 {
        self.length
    }

    /// Hash of the list's name, added to a function hash to form its namespace.
    pub fn message_hash(&self) -> NamespaceHash {
        variable_hash(&self.name)
    }

    pub fn candidates(&self) -> &VariableStore {
        &self.candidates
    }

    pub fn messages(&self) -> &VariableStore {
        &self.messages
    }

    /// Makes room for `capacity` output threads.
    pub fn resize_candidates(&mut self, capacity: u32) {
        self.candidates.resize(capacity);
        if let Some(flags) = self.write_flags.as_mut() {
            flags.resize(self.length.max(capacity));
        }
    }

    /// Binds the candidate store for an output launch.
    pub fn bind_output(&self, curve: &mut CurveTable, namespace: NamespaceHash) -> CoreResult<()> {
        self.candidates.bind(curve, namespace)
    }

    /// Binds the built list for an input launch.
    pub fn bind_input(&self, curve: &mut CurveTable, namespace: NamespaceHash) -> CoreResult<()> {
        self.messages.bind(curve, namespace)
    }

    /// Candidate buffers paired with the list buffers they scatter into.
    fn scatter_columns(&self) -> CoreResult<Vec<(Arc<DeviceBuffer>, Arc<DeviceBuffer>, usize)>> {
        self.candidates
            .descriptors()
            .map(|d| {
                Ok((
                    Arc::clone(self.candidates.buffer(d.name())?),
                    Arc::clone(self.messages.buffer(d.name())?),
                    d.slot_bytes(),
                ))
            })
            .collect()
    }
}

impl MessageSpecialisationHandler for ArrayMessageHandler {
    type MetaData = ArrayMetaData;

    fn init(&mut self) -> CoreResult<()> {
        self.candidates.zero();
        self.messages.zero();
        if self.metadata.is_none() {
            self.allocate_metadata();
        }
        Ok(())
    }

    fn build_index<D: DeviceContext>(
        &mut self,
        device: &D,
        candidate_count: u32,
        flags: &ScanFlags,
    ) -> CoreResult<BuildReport> {
        let candidate_count = candidate_count.min(self.candidates.capacity());
        let length = self.length;
        let columns = self.scatter_columns()?;
        let bins = Arc::clone(self.candidates.buffer(INDEX_VARIABLE_NAME)?);
        self.messages.zero();
        if self.metadata.is_none() {
            self.allocate_metadata();
        }
        let write_flags = self
            .write_flags
            .get_or_insert_with(|| ScanFlags::new(length.max(candidate_count)));
        write_flags.resize(length.max(candidate_count));
        let write_flags = &*write_flags;
        let name = self.name.as_str();

        let mut exceptions = DeviceExceptionBuffer::new();

        // Scatter: first claimant of a bin copies, later ones only report
        device.launch_threads(candidate_count, |idx| {
            let thread = DeviceThread::new(idx, &exceptions);
            let i = idx.global_index();
            if !flags.is_set(i) {
                return;
            }
            let bin = bins.read::<u32>(i as usize * 4).unwrap_or(0);
            if bin >= length {
                dthrow!(
                    thread,
                    "MsgArray message from thread %u has index %u, outside [0, %u)",
                    i,
                    bin,
                    length
                );
                return;
            }
            match write_flags.claim(bin) {
                Some(0) => {
                    for (src, dst, slot) in &columns {
                        dst.copy_from(bin as usize * slot, src, i as usize * slot, *slot);
                    }
                }
                Some(_) => dthrow!(
                    thread,
                    "Multiple threads output array messages to the same index, see index %u.",
                    bin
                ),
                None => {}
            }
        })?;

        // Gap scan
        device.launch_threads(length, |idx| {
            let bin = idx.global_index();
            if write_flags.value(bin) == 0 {
                let thread = DeviceThread::new(idx, &exceptions);
                dthrow!(thread, "Array message list '%s' has no message at index %u.", name, bin);
            }
        })?;

        let live = (0..candidate_count).filter(|&i| flags.is_set(i)).count() as u32;
        let report = BuildReport {
            live,
            collisions: (0..length).map(|b| write_flags.value(b).saturating_sub(1)).sum(),
            gaps: (0..length).filter(|&b| write_flags.value(b) == 0).count() as u32,
        };

        match exceptions.drain() {
            Ok(()) => {
                if report.is_consistent() {
                    debug!(
                        "Built array message list '{}': {} messages in {} bins",
                        self.name, report.live, length
                    );
                } else {
                    warn!(
                        "Array message list '{}' inconsistent: {} collisions, {} gaps",
                        self.name, report.collisions, report.gaps
                    );
                }
                Ok(report)
            }
            Err(err) => {
                warn!(
                    "Array message list '{}' build reported {} error(s)",
                    self.name, err.error_count
                );
                Err(CoreError::Device(err))
            }
        }
    }

    fn allocate_metadata(&mut self) {
        self.metadata = Some(ArrayMetaData {
            length: self.length,
        });
        self.write_flags = Some(ScanFlags::new(self.length.max(self.candidates.capacity())));
    }

    fn free_metadata(&mut self) {
        self.metadata = None;
        self.write_flags = None;
    }

    fn metadata(&self) -> Option<&ArrayMetaData> {
        self.metadata.as_ref()
    }
}
