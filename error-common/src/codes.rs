// Structured error codes recorded on verification results and audit events.
// Codes are stable wire values; renaming one is a breaking change for
// downstream consumers of the result payload.

pub mod extraction {
    /// No front card image attached; extraction cannot start.
    pub const NO_FRONT_IMAGE: &str = "NO_FRONT_IMAGE";
    /// Provider call exceeded the hard extraction ceiling.
    pub const EXTRACTION_TIMEOUT: &str = "EXTRACTION_TIMEOUT";
    /// Document type is not supported by the provider.
    pub const UNSUPPORTED_DOCUMENT: &str = "UNSUPPORTED_DOCUMENT";
    /// Provider rejected the submitted image bytes.
    pub const MALFORMED_INPUT: &str = "MALFORMED_INPUT";
    /// The stored image reference could not be resolved.
    pub const INVALID_IMAGE_REF: &str = "INVALID_IMAGE_REF";
    /// Provider throttled the request.
    pub const PROVIDER_THROTTLED: &str = "PROVIDER_THROTTLED";
    /// Unclassified extraction failure.
    pub const EXTRACTION_FAILED: &str = "EXTRACTION_FAILED";
}

pub mod eligibility {
    /// An eligibility attempt raised an unhandled provider error.
    pub const JOB_FAILED: &str = "JOB_FAILED";
    /// All automatic eligibility attempts are exhausted.
    pub const MAX_RETRIES_EXCEEDED: &str = "MAX_RETRIES_EXCEEDED";
    /// Provider returned a status outside the known vocabulary.
    pub const UNMAPPED_PROVIDER_STATUS: &str = "UNMAPPED_PROVIDER_STATUS";
}

pub mod validation {
    pub const MISSING_REQUIRED_FIELD: &str = "MISSING_REQUIRED_FIELD";
    pub const OUT_OF_RANGE: &str = "OUT_OF_RANGE";
}
