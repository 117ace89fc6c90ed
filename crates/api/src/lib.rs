//! Facade crate: the single authorize-then-dispatch surface (C14) every
//! outer transport drives. Deliberately has no HTTP/transport dependency
//! of its own — the server binary owns that layer and calls `Facade`
//! methods directly.

pub mod facade;

pub use facade::Facade;
