//! Application runtime composition modules.

pub(crate) mod exit_handler;
pub(crate) mod login;
pub(crate) mod runtime;
pub(crate) mod table;
pub(crate) mod terminal;
