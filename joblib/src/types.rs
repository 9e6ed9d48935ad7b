use uuid::Uuid;

pub type Args = Vec<String>;
pub type JobId = Uuid;
pub type CommandLine = String;
