//! JSON-backed metadata store: per-capture [`VideoParameters`] plus a per-field record of VBI,
//! dropout, and timecode information ([`FieldMetadata`]).
//!
//! The store is the side-car document that accompanies a raw TBC sample file (see
//! [`crate::field_io`]).  It is read once at the start of a pipeline run, augmented in place by
//! the various decoder passes, and written back out by the pipeline's emitter thread.

mod field;
mod store;
mod video_params;

pub use field::{
    ClosedCaptionData, DecodedVbi, Dropout, DiscType, FieldMetadata, NtscData, VbiData, VitcData,
};
pub use store::{MetadataError, MetadataResult, MetadataStore};
pub use video_params::{System, ValidVideoParameters, VideoParameters};

#[cfg(test)]
pub(crate) mod testutil;
