//! Saving and loading trained flow weights
//!
//! Flows derive `Module`, so their parameters serialize through Burn's
//! recorders. Only weights are stored; the architecture comes from the
//! [`FlowConfig`](crate::FlowConfig), so a file must be loaded into a flow
//! built from the same configuration.
//!
//! # Example
//!
//! ```ignore
//! use burn_flows::serialize::{load_flow, save_flow};
//!
//! save_flow(&flow, "mnist-simple")?;
//!
//! let (fresh, _) = create_flow::<B>(&config, &device)?;
//! let flow = load_flow(fresh, "mnist-simple", &device)?;
//! ```

use std::path::Path;

use burn::prelude::*;
pub use burn::record::{BinBytesRecorder, BinFileRecorder, FullPrecisionSettings, Recorder};

use crate::error::FlowResult;

/// Create a recorder for full precision binary files
pub fn full_precision_recorder() -> BinFileRecorder<FullPrecisionSettings> {
    BinFileRecorder::new()
}

/// Creates a recorder for full precision binary bytes (in memory)
pub fn bytes_recorder() -> BinBytesRecorder<FullPrecisionSettings> {
    BinBytesRecorder::new()
}

/// Writes the weights of `module` to `path`
///
/// The recorder picks the file extension (`.bin`).
pub fn save_flow<B: Backend, M: Module<B>>(module: &M, path: impl AsRef<Path>) -> FlowResult<()> {
    let path = path.as_ref();
    module
        .clone()
        .save_file(path.to_path_buf(), &full_precision_recorder())?;
    tracing::debug!(path = %path.display(), "saved flow weights");
    Ok(())
}

/// Loads weights from `path` into `module`
pub fn load_flow<B: Backend, M: Module<B>>(
    module: M,
    path: impl AsRef<Path>,
    device: &B::Device,
) -> FlowResult<M> {
    let path = path.as_ref();
    let module = module.load_file(path.to_path_buf(), &full_precision_recorder(), device)?;
    tracing::debug!(path = %path.display(), "loaded flow weights");
    Ok(module)
}

/// Serializes the weights of `module` to bytes
pub fn to_bytes<B: Backend, M: Module<B>>(module: &M) -> FlowResult<Vec<u8>> {
    let bytes = Recorder::<B>::record(&bytes_recorder(), module.clone().into_record(), ())?;
    Ok(bytes)
}

/// Restores weights serialized with [`to_bytes`] into `module`
pub fn from_bytes<B: Backend, M: Module<B>>(
    module: M,
    bytes: Vec<u8>,
    device: &B::Device,
) -> FlowResult<M> {
    let record = Recorder::<B>::load(&bytes_recorder(), bytes, device)?;
    Ok(module.load_record(record))
}
