//! MySQL error classification.

use reverse_core::ReplicationError;

/// Server error codes that a fresh attempt may clear.
const TRANSIENT_SERVER_CODES: &[u16] = &[
    1040, // ER_CON_COUNT_ERROR
    1053, // ER_SERVER_SHUTDOWN
    1205, // ER_LOCK_WAIT_TIMEOUT
    1213, // ER_LOCK_DEADLOCK
    1927, // ER_CONNECTION_KILLED
];

/// Server error codes raised when a value does not fit the target column.
const DATA_SERVER_CODES: &[u16] = &[
    1048, // ER_BAD_NULL_ERROR
    1264, // ER_WARN_DATA_OUT_OF_RANGE
    1292, // ER_TRUNCATED_WRONG_VALUE
    1366, // ER_TRUNCATED_WRONG_VALUE_FOR_FIELD
    1406, // ER_DATA_TOO_LONG
    1452, // ER_NO_REFERENCED_ROW_2
];

/// Map a driver error onto the replication taxonomy.
pub fn classify_mysql_error(e: mysql_async::Error) -> ReplicationError {
    match e {
        mysql_async::Error::Server(server) => {
            let message = format!("[{}] {}", server.code, server.message);
            if TRANSIENT_SERVER_CODES.contains(&server.code) {
                ReplicationError::TransientConnectivity(message)
            } else if DATA_SERVER_CODES.contains(&server.code) {
                ReplicationError::MalformedData(message)
            } else {
                ReplicationError::SourceRejected(message)
            }
        }
        mysql_async::Error::Url(url) => {
            ReplicationError::SourceRejected(format!("Invalid connection URL: {url}"))
        }
        // I/O, driver and connection-level failures.
        other => ReplicationError::TransientConnectivity(other.to_string()),
    }
}
