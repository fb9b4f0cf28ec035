//! Wire protocol: framing, correlation and completion reports.

pub mod correlator;
pub mod decoder;
pub mod framed;
pub mod message;
pub mod parse_failure;
pub mod report;

pub use correlator::{Correlator, DEFAULT_MAX_CORRELATION_ATTEMPTS};
pub use decoder::FrameDecoder;
pub use framed::{FramedStream, ScopedReadTimeout};
pub use message::{
    report_op, status_code, Envelope, Message, Parameters, TransmissionId, PARSE_FAIL_OP,
    REPORT_SUFFIX,
};
pub use parse_failure::{ParseFailure, ParseFailureCode};
pub use report::{
    await_report, ReportExpectation, ReportRequest, DEFAULT_REPORT_NAME, DEFAULT_REPORT_TIMEOUT,
    MAX_REPORT_TIMEOUT,
};
