//! Progress events emitted while processing the track list.
//!
//! The pipeline logs its progress in any case. Callers that want to observe
//! it programmatically hand an unbounded channel sender to
//! [`Pipeline::with_events`](crate::pipeline::Pipeline::with_events).
//!
//! # Example
//!
//! ```rust
//! use vkaudio::events::Event;
//!
//! fn handle_event(event: Event) {
//!     match event {
//!         Event::TrackStarted { index } => println!("track {index} started"),
//!         Event::SegmentSkipped { index, .. } => println!("track {index} lost a segment"),
//!         _ => {}
//!     }
//! }
//! ```

use crate::pipeline::Route;

/// Events emitted by the [`Pipeline`](crate::pipeline::Pipeline).
///
/// `index` is the 1-based position of the track in the list.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Event {
    /// Processing of a track has begun.
    TrackStarted { index: usize },

    /// A segment could not be fetched and was left out of its block.
    SegmentSkipped { index: usize, uri: String },

    /// A key block was written to the intermediate file.
    ///
    /// `block` is 1-based; `bytes` is the number of bytes appended.
    BlockAppended {
        index: usize,
        block: usize,
        blocks: usize,
        bytes: usize,
    },

    /// The final file of a track was written.
    TrackCompleted { index: usize, route: Route },

    /// A track produced no final file.
    TrackSkipped { index: usize, reason: String },
}
