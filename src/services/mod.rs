pub mod session;

pub use session::{
    SessionController, SessionEffect, SessionHandle, SessionInput, SessionInputs, SessionMachine,
    SessionSettings,
};
