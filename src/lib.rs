pub mod aggregate;
pub mod card;
pub mod config;
pub mod error;
pub mod hooks;
pub mod host;
pub mod media;
pub mod player;
pub mod probe;
pub mod scheduler;
pub mod session;
pub mod speed;
pub mod template;

pub use aggregate::{aggregate_answer_duration, AggregateReport, DurationResult};
pub use card::{Card, CardId, CardTemplate, NoteType};
pub use config::{Config, ProbeFailurePolicy};
pub use error::{AutopaceError, Result};
pub use media::{extract_audio_refs, find_audio_fields, media_dir_for_collection, FieldAudioMap};
pub use probe::{probe_duration, DurationProber, MpvProber};
pub use scheduler::{schedule_auto_advance, ScheduleHandle, ScheduleState};
pub use session::{AutoAdvanceSession, HostServices};
pub use template::extract_referenced_fields;
