//! Access predicate covering the full owner/public/share rule set, backed
//! by the same SQL shape the listing query in `db::repository` uses so
//! `can_access` and `list_documents` can never diverge.

use crate::models::{Document, DocumentShare, PermissionLevel};
use chrono::Utc;

#[derive(Debug, Clone, Copy)]
pub struct AccessContext {
    pub user_id: i32,
    pub is_superuser: bool,
}

/// First match wins: superuser, owner, public+read, active non-expired
/// share at or above `level`.
pub fn can_access(
    ctx: &AccessContext,
    document: &Document,
    level: PermissionLevel,
    shares: &[DocumentShare],
) -> bool {
    if ctx.is_superuser {
        return true;
    }
    if document.owner_id == ctx.user_id {
        return true;
    }
    if document.is_public && level == PermissionLevel::Read {
        return true;
    }

    let now = Utc::now();
    shares.iter().any(|share| {
        share.document_id == document.id
            && share.shared_with_user_id == ctx.user_id
            && share.is_active(now)
            && share.permission_level >= level
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProcessingStatus;
    use chrono::Duration;

    fn doc(owner_id: i32, is_public: bool) -> Document {
        Document {
            id: 1,
            owner_id,
            uploaded_by: None,
            title: "t".into(),
            original_filename: "t.pdf".into(),
            file_path: "ab/1/t.pdf".into(),
            file_size: 0,
            mime_type: "application/pdf".into(),
            checksum: "x".into(),
            ocr_text: None,
            ocr_language: None,
            page_count: None,
            extracted_title: None,
            extracted_date: None,
            extracted_correspondent: None,
            extracted_document_type: None,
            extracted_summary: None,
            is_public,
            processing_status: ProcessingStatus::Pending,
            processing_error: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn share(level: PermissionLevel, expires_at: Option<chrono::DateTime<Utc>>) -> DocumentShare {
        DocumentShare {
            id: 1,
            document_id: 1,
            shared_with_user_id: 2,
            shared_by_user_id: Some(1),
            permission_level: level,
            expires_at,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn owner_always_has_access() {
        let ctx = AccessContext { user_id: 1, is_superuser: false };
        assert!(can_access(&ctx, &doc(1, false), PermissionLevel::Admin, &[]));
    }

    #[test]
    fn public_grants_read_only() {
        let ctx = AccessContext { user_id: 2, is_superuser: false };
        let d = doc(1, true);
        assert!(can_access(&ctx, &d, PermissionLevel::Read, &[]));
        assert!(!can_access(&ctx, &d, PermissionLevel::Write, &[]));
    }

    #[test]
    fn expired_share_grants_nothing() {
        let ctx = AccessContext { user_id: 2, is_superuser: false };
        let d = doc(1, false);
        let expired = share(PermissionLevel::Admin, Some(Utc::now() - Duration::hours(1)));
        assert!(!can_access(&ctx, &d, PermissionLevel::Read, &[expired]));
    }

    #[test]
    fn share_level_must_meet_requested_level() {
        let ctx = AccessContext { user_id: 2, is_superuser: false };
        let d = doc(1, false);
        let read_only = share(PermissionLevel::Read, None);
        assert!(can_access(&ctx, &d, PermissionLevel::Read, &[read_only.clone()]));
        assert!(!can_access(&ctx, &d, PermissionLevel::Write, &[read_only]));
    }

    #[test]
    fn superuser_bypasses_everything() {
        let ctx = AccessContext { user_id: 99, is_superuser: true };
        assert!(can_access(&ctx, &doc(1, false), PermissionLevel::Admin, &[]));
    }
}
