pub mod client;
pub mod config;
pub mod error_handling;
pub mod extract;
pub mod input;
pub mod interpolation;
pub mod logging;
pub mod shell;
pub mod stream;

pub use client::{ModelInfo, OllamaClient};
pub use config::Config;
pub use error_handling::{enhance_error, ErrorType, UserFriendlyError};
pub use input::TerminalInput;
pub use interpolation::{CommandResult, Confirm, Interpolation, InterpolationStatus, Interpolator};
pub use shell::{CtrlC, Flow, Interrupts, Session, ShellCommand};
pub use stream::{render_stream, GenerateChunk, StreamDecoder, StreamSummary};
