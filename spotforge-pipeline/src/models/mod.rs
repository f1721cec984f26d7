//! Data model for the production pipeline

pub mod alignment;
pub mod asset;
pub mod blueprint;
pub mod job;
pub mod production;
pub mod script;

pub use alignment::{AlignmentResult, BarEnergy, DuckSegment, MusicAnalysis};
pub use asset::{CharTiming, MusicAsset, MusicVariant, SentenceTiming, VoiceAsset, WordTiming};
pub use blueprint::{
    DuckingPoint, MixingPlan, MusicalBlueprint, Section, SectionDirection, SyncPoint,
    SyncPointKind,
};
pub use job::{EnqueueOptions, Job, JobKind, JobPayload, JobStatus};
pub use production::{LoudnessReport, OutputFormat, Production, ProductionSettings};
pub use script::{
    AdBlueprint, AdContext, ArcSegment, EndingType, FadeSettings, IntroType, MusicSpec,
    MusicalFunction, MusicalStructure, Script, SentenceCue, TtsRecord, VolumeSettings,
};
