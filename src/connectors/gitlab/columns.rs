//! Flattened fields kept from the Gitlab api, per object type.

use crate::helpers::SourceType::{self, Boolean, DateTime, Int, Text};

pub type Columns = &'static [(&'static str, SourceType)];

pub const PROJECTS: Columns = &[
    ("id", Int),
    ("description", Text),
    ("name", Text),
    ("name_with_namespace", Text),
    ("path", Text),
    ("path_with_namespace", Text),
    ("created_at", DateTime),
    ("default_branch", Text),
    ("ssh_url_to_repo", Text),
    ("http_url_to_repo", Text),
    ("web_url", Text),
    ("readme_url", Text),
    ("avatar_url", Text),
    ("forks_count", Int),
    ("star_count", Int),
    ("last_activity_at", DateTime),
];

pub const TAGS: Columns = &[
    ("name", Text),
    ("message", Text),
    ("target", Text),
    ("commit_id", Text),
    ("commit_short_id", Text),
    ("commit_created_at", DateTime),
    ("commit_parent_ids_0", Text),
    ("commit_parent_ids_1", Text),
    ("commit_title", Text),
    ("commit_message", Text),
    ("commit_author_name", Text),
    ("commit_author_email", Text),
    ("commit_authored_date", DateTime),
    ("commit_committer_name", Text),
    ("commit_committer_email", Text),
    ("commit_committed_date", DateTime),
    ("commit_web_url", Text),
    ("release_tag_name", Text),
    ("release_description", Text),
    ("protected", Boolean),
];

pub const ISSUES: Columns = &[
    ("id", Int),
    ("iid", Int),
    ("project_id", Int),
    ("title", Text),
    ("description", Text),
    ("state", Text),
    ("created_at", DateTime),
    ("updated_at", DateTime),
    ("closed_at", DateTime),
    ("milestone_id", Int),
    ("milestone_iid", Int),
    ("milestone_group_id", Int),
    ("milestone_title", Text),
    ("milestone_description", Text),
    ("milestone_state", Text),
    ("milestone_created_at", DateTime),
    ("milestone_updated_at", DateTime),
    ("milestone_due_date", DateTime),
    ("milestone_start_date", DateTime),
    ("milestone_expired", Boolean),
    ("milestone_web_url", Text),
    ("type", Text),
    ("user_notes_count", Int),
    ("merge_requests_count", Int),
    ("upvotes", Int),
    ("downvotes", Int),
    ("due_date", DateTime),
    ("confidential", Boolean),
    ("discussion_locked", Boolean),
    ("issue_type", Text),
    ("web_url", Text),
    ("time_stats_time_estimate", Int),
    ("time_stats_total_time_spent", Int),
    ("time_stats_human_time_estimate", Text),
    ("time_stats_human_total_time_spent", Text),
    ("task_completion_status_count", Int),
    ("task_completion_status_completed_count", Int),
    ("weight", Int),
    ("blocking_issues_count", Int),
    ("has_tasks", Boolean),
    ("references_short", Text),
    ("references_relative", Text),
    ("references_full", Text),
    ("moved_to_id", Text),
    ("service_desk_reply_to", Text),
    ("epic_iid", Int),
    ("epic_id", Int),
    ("epic_title", Text),
    ("epic_url", Text),
    ("epic_group_id", Int),
    ("epic_human_readable_end_date", Text),
    ("epic_human_readable_timestamp", Text),
];

pub const PIPELINES: Columns = &[
    ("id", Int),
    ("iid", Int),
    ("project_id", Int),
    ("status", Text),
    ("source", Text),
    ("ref", Text),
    ("sha", Text),
    ("web_url", Text),
    ("created_at", DateTime),
    ("updated_at", DateTime),
];

pub const MERGE_REQUESTS: Columns = &[
    ("id", Int),
    ("iid", Int),
    ("project_id", Int),
    ("title", Text),
    ("description", Text),
    ("state", Text),
    ("merged_at", DateTime),
    ("closed_at", DateTime),
    ("created_at", DateTime),
    ("updated_at", DateTime),
    ("target_branch", Text),
    ("source_branch", Text),
    ("source_project_id", Int),
    ("target_project_id", Int),
    ("draft", Boolean),
    ("work_in_progress", Boolean),
    ("milestone_id", Int),
    ("milestone_iid", Int),
    ("milestone_project_id", Int),
    ("milestone_title", Text),
    ("milestone_description", Text),
    ("milestone_state", Text),
    ("milestone_created_at", DateTime),
    ("milestone_updated_at", DateTime),
    ("milestone_due_date", DateTime),
    ("milestone_start_date", DateTime),
    ("merge_commit_sha", Text),
    ("squash_commit_sha", Text),
];
