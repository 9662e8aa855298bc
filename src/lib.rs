pub mod collaborators;
pub mod config;
pub mod protocol;
pub mod session;
pub mod transport;

// Re-export commonly used items for convenience
pub use collaborators::{
    AnalyticsClient, CoachingAdvice, CollaboratorError, ContextClient, CredentialClient,
    EvaluationClient, SessionContext, SessionMeta, TransportCredentials,
};
pub use config::{RetryPolicy, SessionSettings};
pub use protocol::{ClientEvent, DecodeError, DomainEvent, Speaker, decode};
pub use session::{
    InterviewSession, SessionDeps, SessionError, SessionPhase, SessionSnapshot, SuggestionEntry,
    Transcript, TranscriptEntry,
};
pub use transport::{
    MicrophoneTrack, SignalHandler, Transport, TransportError, TransportSignal, create_transport,
};
