//! Domain Models
//!
//! TigerStyle: Explicit types, validated constructors.
//!
//! Plain rows mirroring the relational schema. Associations are loaded into
//! [`EventDetail`] by the storage layer rather than navigated lazily.

mod backup;
mod event;
mod user;

pub use backup::{
    BackupHistory, BackupStatus, RestoreOperation, RestoreStatus, BACKUP_NAME_BYTES_MAX,
    RESTORE_PROGRESS_MAX,
};
pub use event::{
    Department, Event, EventDetail, EventFilter, EventLink, LinkPlatform, Page, Tag,
    DEPARTMENT_NAME_BYTES_MAX, EVENT_LINK_URL_BYTES_MAX, EVENT_LOCATION_BYTES_MAX,
    EVENT_TITLE_BYTES_MAX, TAG_NAME_BYTES_MAX,
};
pub use user::{Role, RoleName, User, USER_EMAIL_BYTES_MAX, USER_FULL_NAME_BYTES_MAX};
