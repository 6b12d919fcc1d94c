/// TypeScript declarations for the records a dashboard polls, generated from
/// the Rust entities with ts-rs.
use crate::entities::*;
use ts_rs::TS;

pub fn generate_typescript_schema() -> String {
    let mut schema = String::new();

    schema.push_str("// TypeScript types generated from Rust entities using ts-rs\n\n");

    for decl in [
        JobStatus::decl(),
        UrlStatus::decl(),
        SitemapRecord::decl(),
        ProcessingJob::decl(),
        SitemapUrlEntry::decl(),
        NotificationKind::decl(),
        NotificationData::decl(),
        Notification::decl(),
    ] {
        schema.push_str("export ");
        schema.push_str(&decl);
        schema.push('\n');
    }

    schema
}
