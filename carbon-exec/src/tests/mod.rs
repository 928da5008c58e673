mod fixtures;
mod utils;

mod service;
