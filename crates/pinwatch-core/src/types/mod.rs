mod check;
mod metadata;
mod server;
mod status;

pub use check::*;
pub use metadata::*;
pub use server::*;
pub use status::*;
