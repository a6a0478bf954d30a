// ============================================================
// Layer 3 — Domain Layer
// ============================================================
// Plain Rust structs and traits describing rasters, predictions
// and failures.
//
// Rules for this layer:
//   - NO Burn framework types allowed here
//   - NO file I/O
//   - NO file-format knowledge (GeoTIFF lives in infra)
//
// Reference: Rust Book §5 (Structs), §10 (Traits)

// Rasters, predictions and their georeferencing
pub mod raster;

// Per-file failures and the run summary
pub mod failure;

// Read/write abstractions the pipeline is built on
pub mod traits;
