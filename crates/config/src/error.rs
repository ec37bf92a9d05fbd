// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Errors for the config crate.

use miette::Diagnostic;

/// Errors that can occur while loading, validating, or distributing the
/// pipeline configuration.
#[derive(thiserror::Error, Debug, Diagnostic)]
pub enum Error {
    /// A collection of errors that occurred during parsing or validating the configuration.
    #[error("Invalid configuration: {errors:?}")]
    #[diagnostic(code(fb_chain::invalid_configuration), url(docsrs))]
    InvalidConfiguration {
        /// A list of errors that occurred during parsing or validating the configuration.
        #[related]
        errors: Vec<Error>,
    },

    /// An error that occurred while reading the pipeline spec document.
    #[error("File read error: {details} (path: {path})")]
    #[diagnostic(code(fb_chain::file_read_error), url(docsrs))]
    FileReadError {
        /// The path that could not be read.
        path: String,
        /// A description of the error that occurred.
        details: String,
    },

    /// An error that occurred while writing the pipeline spec status back.
    #[error("File write error: {details} (path: {path})")]
    #[diagnostic(code(fb_chain::file_write_error), url(docsrs))]
    FileWriteError {
        /// The path that could not be written.
        path: String,
        /// A description of the error that occurred.
        details: String,
    },

    /// An error that occurred while deserializing a configuration document.
    #[error("{format} deserialization error: {details}")]
    #[diagnostic(code(fb_chain::deserialization_error), url(docsrs))]
    DeserializationError {
        /// The format of the configuration document (e.g. "YAML").
        format: String,
        /// A description of the error that occurred.
        details: String,
    },

    /// A function block referenced in the pipeline is not one of the known stages.
    #[error("Unknown function block `{fb_name}`")]
    #[diagnostic(code(fb_chain::unknown_function_block), url(docsrs))]
    UnknownFunctionBlock {
        /// The unrecognized stage name.
        fb_name: String,
    },

    /// A non-tail function block was declared without a `next_fb` address.
    #[error("Function block `{fb_name}` is enabled but has no `next_fb` address")]
    #[diagnostic(code(fb_chain::missing_next_fb), url(docsrs))]
    MissingNextFb {
        /// The stage missing its downstream address.
        fb_name: String,
    },

    /// A function block was declared without a DLQ address.
    #[error("Function block `{fb_name}` has no `dlq` address")]
    #[diagnostic(code(fb_chain::missing_dlq), url(docsrs))]
    MissingDlq {
        /// The stage missing its DLQ address.
        fb_name: String,
    },

    /// The stage-specific parameters failed to parse or validate.
    #[error("Invalid parameters for `{fb_name}`: {details}")]
    #[diagnostic(code(fb_chain::invalid_parameters), url(docsrs))]
    InvalidParameters {
        /// The stage whose parameters are invalid.
        fb_name: String,
        /// A description of the error that occurred.
        details: String,
    },

    /// A numeric knob is outside its permitted range.
    #[error("`{field}` for `{fb_name}` is out of range: {details}")]
    #[diagnostic(code(fb_chain::out_of_range), url(docsrs))]
    OutOfRange {
        /// The stage the knob belongs to.
        fb_name: String,
        /// The offending field.
        field: String,
        /// A description of the permitted range.
        details: String,
    },
}

impl Error {
    /// Folds a list of validation errors into a single error, or `Ok(())`
    /// when the list is empty.
    pub fn from_errors(errors: Vec<Error>) -> Result<(), Error> {
        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::InvalidConfiguration { errors })
        }
    }
}
