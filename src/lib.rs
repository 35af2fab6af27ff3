//! shadowclip: always-on instant replay for the desktop.
//!
//! The recorder continuously encodes the screen (and optionally audio)
//! into a rolling on-disk buffer of the last N seconds; a hotkey handler
//! calls [`Recorder::save_clip`] to materialize that history as a single
//! MP4 without ever having "started" a recording.
//!
//! # Architecture
//!
//! * [`capture`]: paced desktop-duplication loop on a dedicated thread.
//! * [`pool`] / [`channel`]: exact-size frame buffers and the drop-oldest
//!   hand-off that keeps capture from ever blocking on the encoder.
//! * [`ffmpeg`]: the long-lived segmenting encoder subprocess and the
//!   short-lived snapshot mux invocations.
//! * [`segments`]: monotonic segment naming, listing, and background
//!   retention of the rolling window.
//! * [`audio`]: WASAPI loopback and microphone WAV sidecars with sync
//!   offsets against the recorder clock.
//! * [`snapshot`]: tail selection, concat manifest, and the copy-remux
//!   that produces the final clip.
//! * [`recorder`]: the facade tying it together: lifecycle state
//!   machine, events, and the API the UI layer binds.
//!
//! The UI shell (tray, hotkeys, settings persistence) lives outside this
//! crate; it consumes [`RecorderEvent`]s and drives the [`Recorder`].

pub mod audio;
pub mod capture;
pub mod channel;
pub mod clock;
pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod ffmpeg;
#[cfg(windows)]
pub mod job_object;
pub mod pool;
pub mod recorder;
pub mod segments;
pub mod snapshot;

pub use config::{EncoderVendor, RecorderConfig, SoftwarePreset, VideoCodec};
pub use error::RecorderError;
pub use events::{ErrorSource, EventSink, PerformanceStats, RecorderEvent};
pub use recorder::{Recorder, RecorderState, RecorderStats};
pub use snapshot::SavedClip;
