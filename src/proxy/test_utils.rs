//! Test utilities for proxy module testing
