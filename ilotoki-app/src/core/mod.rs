//! Core translator functionality
//!
//! This module contains the view model that ties model acquisition to the
//! translation form.

pub mod translator;
