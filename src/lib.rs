//! Downloads audio tracks, including segmented and AES-128 encrypted
//! playlists, and reassembles them into audio files.
//!
//! The entry point is [`pipeline::Pipeline`], which takes the
//! [`catalog::TrackDescriptor`]s obtained from a [`catalog::Catalog`].
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_panics_doc)]

#[macro_use]
extern crate log;

pub mod assembler;
pub mod catalog;
pub mod config;
pub mod error;
pub mod events;
pub mod http;
pub mod key;
pub mod pipeline;
pub mod playlist;
pub mod segment;
pub mod transcode;
pub mod util;
