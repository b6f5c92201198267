//! Error Types
//!
//! This module defines the error types used throughout the crate.
//!
//! # Overview
//!
//! The main error type [`RhiError`] covers the failure modes that are
//! reported to callers:
//! - Invalid arguments (non-positive pool lengths)
//! - Shader uniform lookups (unknown names, foreign or dead handles)
//! - Configuration parsing
//!
//! Resource-availability failures on the submission path (stale handles,
//! unresolvable variants, staging allocation failures) are **not** errors:
//! they are logged and the affected draw or upload is skipped so the frame
//! loop keeps running.
//!
//! # Usage
//!
//! ```rust,ignore
//! use myth_rhi::errors::{RhiError, Result};
//!
//! fn lookup(shader: &Shader, handle: &ShaderHandle) -> Result<()> {
//!     let info = shader.try_uniform(handle)?;
//!     log::debug!("uniform {} has {} elements", info.name, info.count);
//!     Ok(())
//! }
//! ```

use thiserror::Error;

/// The main error type for the render hardware interface.
#[derive(Error, Debug)]
pub enum RhiError {
    // ========================================================================
    // Argument Errors
    // ========================================================================
    /// A length argument was zero where a positive length is required.
    #[error("Invalid length: {0} (must be greater than zero)")]
    InvalidLength(usize),

    // ========================================================================
    // Shader Errors
    // ========================================================================
    /// The shader declares no uniform with this name.
    #[error("Unknown uniform: {0}")]
    UnknownUniform(String),

    /// A value of the wrong type was supplied for a uniform.
    #[error("Uniform type mismatch for '{name}': expected {expected}, got {actual}")]
    UniformTypeMismatch {
        /// Uniform name
        name: String,
        /// Declared type
        expected: String,
        /// Supplied type
        actual: String,
    },

    /// The shader owning the handle has been disposed.
    #[error("Shader '{0}' has been disposed")]
    ShaderDisposed(String),

    /// The handle was obtained from a different shader.
    #[error("Shader handle belongs to shader #{owner}, not #{shader}")]
    ForeignShaderHandle {
        /// Id of the shader that produced the handle
        owner: u64,
        /// Id of the shader it was used against
        shader: u64,
    },

    // ========================================================================
    // Resource Errors
    // ========================================================================
    /// A registry or device refused to allocate another resource.
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Native backend failure.
    #[error("Backend error: {0}")]
    Backend(String),

    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Settings could not be parsed.
    #[error("Configuration error: {0}")]
    Config(#[from] serde_json::Error),
}

/// Alias for `Result<T, RhiError>`.
pub type Result<T> = std::result::Result<T, RhiError>;
