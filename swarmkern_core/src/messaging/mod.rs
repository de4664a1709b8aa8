//! Message specialisations.
//!
//! Each message type has a device half (what an agent function sees through
//! `message_in` / `message_out`) and a host half (how the candidate
//! messages written by one launch become the list read by the next).
//!
//! ```text
//!  output launch           build_index            input launch
//! ┌──────────────┐      ┌──────────────┐      ┌──────────────┐
//! │ Out::set_*   │ ───▶ │ candidates ─▶│ ───▶ │ In::at       │
//! │ scan flag    │      │ dense list   │      │ In::filter   │
//! └──────────────┘      └──────────────┘      └──────────────┘
//! ```

pub mod array;

pub use array::{
    ArrayFilter, ArrayFilterIter, ArrayFilterMessage, ArrayIn, ArrayMessage, ArrayMessageHandler,
    ArrayMetaData, ArrayOut, MsgArray,
};

use crate::curve::{CurveTable, NamespaceHash};
use crate::error::CoreResult;
use crate::exception::DeviceThread;
use crate::scan::ScanFlags;
use serde::{Deserialize, Serialize};
use swarmkern_env::DeviceContext;

/// Everything a device-side channel needs to reach its buffers.
#[derive(Clone, Copy)]
pub struct ChannelContext<'a> {
    pub curve: &'a CurveTable,
    pub thread: DeviceThread<'a>,
    pub agent_func_hash: NamespaceHash,
    pub message_hash: NamespaceHash,
}

impl<'a> ChannelContext<'a> {
    /// Namespace of this message type as seen by this agent function.
    #[inline]
    pub fn combined_hash(&self) -> NamespaceHash {
        self.agent_func_hash.wrapping_add(self.message_hash)
    }
}

/// A message type usable as the input or output of an agent function.
pub trait Messaging: Send + Sync + 'static {
    /// Host-built data handed unchanged to every device-side channel.
    type MetaData: Send + Sync;

    /// Device-side reader.
    type In<'a>;

    /// Device-side writer.
    type Out<'a>;

    fn input<'a>(ctx: ChannelContext<'a>, metadata: &'a Self::MetaData) -> Self::In<'a>;

    fn output<'a>(
        ctx: ChannelContext<'a>,
        metadata: &'a Self::MetaData,
        flags: &'a ScanFlags,
    ) -> Self::Out<'a>;
}

/// No messages in or out.
#[derive(Debug, Clone, Copy, Default)]
pub struct MsgNone;

/// Channel of [`MsgNone`]; has no methods.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoChannel;

impl Messaging for MsgNone {
    type MetaData = ();
    type In<'a> = NoChannel;
    type Out<'a> = NoChannel;

    fn input<'a>(_ctx: ChannelContext<'a>, _metadata: &'a ()) -> NoChannel {
        NoChannel
    }

    fn output<'a>(_ctx: ChannelContext<'a>, _metadata: &'a (), _flags: &'a ScanFlags) -> NoChannel {
        NoChannel
    }
}

/// Outcome of a successful index build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildReport {
    /// Candidates with their output flag set
    pub live: u32,
    /// Live candidates that lost their bin to an earlier writer
    pub collisions: u32,
    /// Bins no candidate claimed
    pub gaps: u32,
}

impl BuildReport {
    /// True if every bin holds exactly one message.
    pub fn is_consistent(&self) -> bool {
        self.collisions == 0 && self.gaps == 0
    }
}

/// Host-side lifecycle of one message list.
pub trait MessageSpecialisationHandler {
    type MetaData;

    /// Resets the built list before the output launch.
    fn init(&mut self) -> CoreResult<()>;

    /// Turns the `candidate_count` candidates flagged in `flags` into the built list.
    fn build_index<D: DeviceContext>(
        &mut self,
        device: &D,
        candidate_count: u32,
        flags: &ScanFlags,
    ) -> CoreResult<BuildReport>;

    fn allocate_metadata(&mut self);

    fn free_metadata(&mut self);

    /// Metadata for input channels; `None` until allocated.
    fn metadata(&self) -> Option<&Self::MetaData>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combined_hash_wraps() {
        let curve = CurveTable::new();
        let exceptions = crate::exception::DeviceExceptionBuffer::new();
        let ctx = ChannelContext {
            curve: &curve,
            thread: DeviceThread::new(swarmkern_env::ThreadIdx::from_global(0, 1), &exceptions),
            agent_func_hash: u32::MAX,
            message_hash: 2,
        };
        assert_eq!(ctx.combined_hash(), 1);
    }

    #[test]
    fn test_build_report_consistency() {
        assert!(BuildReport { live: 4, collisions: 0, gaps: 0 }.is_consistent());
        assert!(!BuildReport { live: 4, collisions: 1, gaps: 1 }.is_consistent());
    }
}
