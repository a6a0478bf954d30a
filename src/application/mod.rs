// ============================================================
// Layer 2 — Application / Use Cases
// ============================================================
// This layer orchestrates the other layers to accomplish one
// goal: training a model or running it over a raster list.
//
// Rules for this layer:
//   - No ML math or model code here
//   - No printing here (that's Layer 1)
//   - File formats live in Layer 4 and 6
//   - Only workflow coordination
//
// Reference: Clean Architecture pattern
//            Rust Book §7 (Module System)

// Experiment file parsing and validation
pub mod config;

// The training workflow
pub mod train_use_case;

// The batch GeoTIFF inference workflow
pub mod infer_use_case;
