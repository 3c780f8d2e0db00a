//! Test suites for the keel host daemon.

mod support;
