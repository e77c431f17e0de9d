pub mod user;
pub mod visit;

pub use user::{CredentialsForm, NewUser, Prefs, UserProfile, UserRecord, PREF_RANGE, PREF_SITE};
pub use visit::{
    BucketMap, Dump, LogData, LogEntry, PingResponse, SiteDump, SiteLinks, SiteSnapshot,
    TimedVisits, UserDump, Visit,
};
