pub mod core;
pub mod import;
pub mod media;
pub mod srs;
pub mod store;

pub use crate::{
    core::{ImportSummary, TangoError, UserProgress},
    import::import_apkg,
    media::{MediaConfig, MediaStore},
    store::Store,
};
