// ============================================================
// Layer 6 — Infrastructure Layer
// ============================================================
// File formats and persistence used by the layers above:
//
//   geotiff.rs     — GeoTIFF codec
//                    Reads multi-band rasters with their
//                    georeferencing; writes float32, tiled,
//                    LZW-compressed predictions that carry the
//                    same georeferencing.
//
//   manifest.rs    — Input list and failed_files.json
//
//   checkpoint.rs  — Model config, weights and epoch pointers
//                    Uses Burn's CompactRecorder to serialise
//                    model parameters to disk.
//
//   metrics.rs     — Training metrics logging
//                    One CSV row per epoch.
//
// Reference: Rust Book §9 (Error Handling with anyhow)
//            Burn Book §5 (Checkpointing)

/// GeoTIFF reading and writing
pub mod geotiff;

/// Input manifest and failure manifest
pub mod manifest;

/// Model checkpoint saving and loading
pub mod checkpoint;

/// Training metrics CSV logger
pub mod metrics;
