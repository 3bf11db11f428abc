mod common;
mod lock;
