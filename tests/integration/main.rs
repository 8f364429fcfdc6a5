//! Integration tests for fundscout

mod common;
mod crawl_tests;
mod scheduler_tests;
