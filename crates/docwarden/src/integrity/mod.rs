//! Consistency validation between pages and consolidated content.

pub mod healer;
pub mod issue;
pub mod validator;

pub use healer::{heal_policy, HealOutcome, IntegrityHealer};
pub use issue::{classify, IntegrityIssue, IssueType};
pub use validator::IntegrityValidator;
