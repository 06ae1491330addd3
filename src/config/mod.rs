//! # Configuration Module
//!
//! This module provides the pipeline configuration and its validation.

pub mod config;
