//! Keeps you honest about the task you said you'd be doing. Every interval the screen is captured
//! and shown to a vision model together with the task; when the model says you've drifted off, a
//! full screen lock appears that only goes away once you type out an apology.

pub mod capture;
pub mod classifier;
pub mod cli;
pub mod monitor;
pub mod overlay;
pub mod utils;
