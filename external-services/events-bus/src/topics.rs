//! Topic naming for verification notifications
//!
//! One status topic and one progress topic per verification record, so
//! subscribers can watch a single case without filtering a shared stream.

use uuid::Uuid;

/// Topic carrying status-change events for a single record.
pub fn verification_status(record_id: Uuid) -> String {
    format!("verification.status.{record_id}")
}

/// Topic carrying pipeline progress events (stage name + percent) for a
/// single record.
pub fn verification_progress(record_id: Uuid) -> String {
    format!("verification.progress.{record_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topics_embed_the_record_id() {
        let id = Uuid::new_v4();
        assert_eq!(verification_status(id), format!("verification.status.{id}"));
        assert_eq!(
            verification_progress(id),
            format!("verification.progress.{id}")
        );
    }
}
