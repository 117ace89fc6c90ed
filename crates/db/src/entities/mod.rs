//! Document shapes stored in the backing document store.

pub mod attachment;
pub mod comment;
pub mod counter;
pub mod messenger;
pub mod note;
pub mod space;
pub mod user;
pub mod value;

pub use attachment::{Attachment, AttachmentMeta, ImageMeta, PendingAttachment};
pub use comment::Comment;
pub use counter::{Counter, CounterKind, GLOBAL_SCOPE};
pub use messenger::{MessageFormat, MessengerMirror, MessengerTask, MessengerTaskStatus, MessengerTaskType};
pub use note::Note;
pub use space::{
    ADMIN_USERNAME, ALL_FILTER_NAME, Condition, FieldDef, FieldRef, FilterDef, MessengerSettings,
    Operator, SortSpec, Space,
};
pub use user::{Session, User};
pub use value::{FieldOptions, FieldType, NumericKind, StringKind, TypedValue};
