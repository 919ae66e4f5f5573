pub mod assemblyai;
pub mod lmstudio;
