pub mod archive;
pub mod progress;
pub mod source;

pub use progress::ProgressSender;
pub use source::DirectorySource;
