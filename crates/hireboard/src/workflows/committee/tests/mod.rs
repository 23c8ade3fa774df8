mod common;
mod tokens;
