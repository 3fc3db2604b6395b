//! Reassembly of fragmented messages on the subscriber side.
//!
//! Messages larger than the MTU arrive as a run of fragments flagged
//! begin/middle/end. An image is a single-session ordered stream, so one
//! scratch buffer per assembler is enough; interleaving cannot occur.

use crate::logbuffer::frame_descriptor::{BEGIN_FRAG_FLAG, END_FRAG_FLAG};
use crate::logbuffer::header::Header;

/// Wraps a whole-message handler, joining fragment runs before delivery.
/// Unfragmented messages pass straight through without a copy.
pub struct FragmentAssembler<H> {
    handler: H,
    buffer: Vec<u8>,
    in_progress: bool,
}

impl<H> FragmentAssembler<H>
where
    H: FnMut(&[u8], &Header),
{
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            buffer: Vec::new(),
            in_progress: false,
        }
    }

    /// The fragment handler to hand to `Image::poll`.
    pub fn handler_fn(&mut self) -> impl FnMut(&[u8], &Header) + '_ {
        move |body, header| self.on_fragment(body, header)
    }

    fn on_fragment(&mut self, body: &[u8], header: &Header) {
        let flags = header.flags();

        if flags & BEGIN_FRAG_FLAG != 0 && flags & END_FRAG_FLAG != 0 {
            (self.handler)(body, header);
            return;
        }

        if flags & BEGIN_FRAG_FLAG != 0 {
            self.buffer.clear();
            self.buffer.extend_from_slice(body);
            self.in_progress = true;
            return;
        }

        if self.in_progress {
            self.buffer.extend_from_slice(body);
            if flags & END_FRAG_FLAG != 0 {
                self.in_progress = false;
                (self.handler)(&self.buffer, header);
            }
        }
        // A middle/end fragment with no begin on record means this image
        // joined mid-message; drop until the next begin.
    }
}
