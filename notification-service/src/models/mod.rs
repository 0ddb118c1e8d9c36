pub mod notification;

pub use notification::{Notification, NOTIFICATIONS, NOTIFICATION_FIELDS};
