pub mod committee;
