//! Test suites exercising the daemon end to end.

mod support;
