pub mod conversation;
pub mod core;
pub mod history;
pub mod llm;
pub mod logging;
pub mod rag;
pub mod security;
pub mod session;
pub mod state;
pub mod tools;
pub mod workspace;
