//! Integration tests for the h2x engine


mod frame_codec;
mod manager;
