//! Cutroom Render Engine
//!
//! Turns a [`Project`](cutroom_project_model::Project) timeline into one
//! finished audio/video file. Three strategies can do the work; the
//! selector orders them and [`render_project`] walks the chain.
//!
//! # Pipeline Architecture
//!
//! ```text
//! Project + RenderSettings
//!          │
//!          ▼
//!   selector::plan ──▶ [native service, streaming, filter graph]
//!          │
//!          ├── native service:  multipart upload ─▶ rendered bytes
//!          │
//!          ├── streaming:  demux ─▶ decode ─▶ pick ─▶ composite ─▶ encode ─▶ mux
//!          │                                              ▲
//!          │               audio_mix (offline) ───────────┘
//!          │
//!          └── filter graph:  spans ─▶ concat/amix graph ─▶ transcoder
//!                                                             │
//!                                                             ▼
//!                                                    RenderOutput { bytes, mime }
//! ```

pub mod audio_mix;
pub mod cancel;
pub mod codec;
pub mod compositor;
pub mod context;
pub mod export;
pub mod filter_graph;
pub mod fonts;
pub mod native_service;
pub mod progress;
pub mod selector;
pub mod streaming;

pub use cancel::CancelFlag;
pub use context::RenderContext;
pub use export::*;
pub use progress::{progress_channel, ProgressSink, RenderProgress, RenderStage};
pub use selector::{Capabilities, Strategy};
