use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::model::{Reservation, StatusKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Teacher,
    Student,
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "teacher" => Ok(Role::Teacher),
            "student" => Ok(Role::Student),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// The authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: String,
    pub role: Role,
    pub department_id: Option<String>,
}

impl Actor {
    pub fn new(id: impl Into<String>, role: Role, department_id: Option<String>) -> Self {
        Self {
            id: id.into(),
            role,
            department_id,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    View,
    Create,
    UpdateSchedule,
    Cancel,
    Approve,
    Reject,
    Delete,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::View => "view",
            Action::Create => "create",
            Action::UpdateSchedule => "update",
            Action::Cancel => "cancel",
            Action::Approve => "approve",
            Action::Reject => "reject",
            Action::Delete => "delete",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a non-admin actor relates to a booking. Owner takes precedence over department.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relationship {
    Owner,
    SameDepartmentTeacher,
    Other,
}

pub fn relationship(actor: &Actor, booking: &Reservation) -> Relationship {
    if booking.requester_id == actor.id {
        return Relationship::Owner;
    }
    let same_department = match (&actor.department_id, &booking.department_id) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    };
    if actor.role == Role::Teacher && same_department {
        Relationship::SameDepartmentTeacher
    } else {
        Relationship::Other
    }
}

/// Total decision over (role, relationship, action, status). Never errors; denial is `false`.
///
/// `booking` is `None` only for `Create`; any other action without a booking is denied.
pub fn can_perform(actor: &Actor, action: Action, booking: Option<&Reservation>) -> bool {
    if action == Action::Create {
        return true;
    }
    if actor.is_admin() {
        return booking.is_some();
    }
    let Some(booking) = booking else {
        return false;
    };
    let status = booking.status.kind();

    match (relationship(actor, booking), action) {
        (_, Action::Create) => true,
        (Relationship::Owner, Action::View | Action::Cancel) => true,
        (Relationship::Owner, Action::UpdateSchedule | Action::Delete) => {
            status == StatusKind::Pending
        }
        (Relationship::SameDepartmentTeacher, Action::View) => {
            matches!(status, StatusKind::Pending | StatusKind::Approved)
        }
        (Relationship::Other, Action::View) => status == StatusKind::Approved,
        (_, Action::Approve | Action::Reject) => false,
        (Relationship::SameDepartmentTeacher | Relationship::Other, _) => false,
    }
}

/// `can_perform`, except that a request whose only effect is cancelling is judged
/// as `Cancel`: owners may always withdraw their own booking.
pub fn authorize(
    actor: &Actor,
    action: Action,
    booking: &Reservation,
    cancels_only: bool,
) -> bool {
    if can_perform(actor, action, Some(booking)) {
        return true;
    }
    cancels_only
        && matches!(action, Action::UpdateSchedule | Action::Delete)
        && can_perform(actor, Action::Cancel, Some(booking))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use ulid::Ulid;

    const ALL_ACTIONS: [Action; 7] = [
        Action::View,
        Action::Create,
        Action::UpdateSchedule,
        Action::Cancel,
        Action::Approve,
        Action::Reject,
        Action::Delete,
    ];

    fn booking(owner: &str, dept: Option<&str>, status: BookingStatus) -> Reservation {
        Reservation {
            id: Ulid::new(),
            resource_id: Ulid::new(),
            date: "2025-04-01".parse().unwrap(),
            span: Span::new("09:00".parse().unwrap(), "10:00".parse().unwrap()),
            requester_id: owner.into(),
            department_id: dept.map(Into::into),
            purpose: "lecture".into(),
            attendees: 40,
            requirements: vec![],
            notes: None,
            status,
            created_at: 0,
            updated_at: 0,
            updated_by: owner.into(),
            revision: 0,
        }
    }

    fn approved() -> BookingStatus {
        BookingStatus::Approved {
            approved_at: 1,
            approved_by: "admin".into(),
        }
    }

    fn rejected() -> BookingStatus {
        BookingStatus::Rejected {
            remarks: "double booked".into(),
            rejected_at: 1,
            rejected_by: "admin".into(),
        }
    }

    fn cancelled() -> BookingStatus {
        BookingStatus::Cancelled {
            cancelled_at: 1,
            cancelled_by: "alice".into(),
        }
    }

    fn admin() -> Actor {
        Actor::new("root", Role::Admin, None)
    }

    fn alice() -> Actor {
        Actor::new("alice", Role::Student, Some("physics".into()))
    }

    #[test]
    fn role_parses_case_insensitively() {
        assert_eq!("Admin".parse::<Role>(), Ok(Role::Admin));
        assert_eq!(" teacher ".parse::<Role>(), Ok(Role::Teacher));
        assert!("janitor".parse::<Role>().is_err());
    }

    #[test]
    fn anyone_may_create() {
        for role in [Role::Admin, Role::Teacher, Role::Student] {
            assert!(can_perform(&Actor::new("x", role, None), Action::Create, None));
        }
    }

    #[test]
    fn admin_may_do_everything_in_every_status() {
        for status in [BookingStatus::Pending, approved(), rejected(), cancelled()] {
            let b = booking("alice", None, status);
            for action in ALL_ACTIONS {
                assert!(can_perform(&admin(), action, Some(&b)), "{action}");
            }
        }
    }

    #[test]
    fn non_create_actions_need_a_booking() {
        assert!(!can_perform(&admin(), Action::View, None));
        assert!(!can_perform(&alice(), Action::Cancel, None));
    }

    #[test]
    fn owner_rules() {
        let pending = booking("alice", Some("physics"), BookingStatus::Pending);
        let approved = booking("alice", Some("physics"), approved());
        let me = alice();

        assert!(can_perform(&me, Action::View, Some(&pending)));
        assert!(can_perform(&me, Action::UpdateSchedule, Some(&pending)));
        assert!(can_perform(&me, Action::Delete, Some(&pending)));
        assert!(can_perform(&me, Action::Cancel, Some(&pending)));

        assert!(can_perform(&me, Action::View, Some(&approved)));
        assert!(can_perform(&me, Action::Cancel, Some(&approved)));
        assert!(!can_perform(&me, Action::UpdateSchedule, Some(&approved)));
        assert!(!can_perform(&me, Action::Delete, Some(&approved)));

        for b in [&pending, &approved] {
            assert!(!can_perform(&me, Action::Approve, Some(b)));
            assert!(!can_perform(&me, Action::Reject, Some(b)));
        }
    }

    #[test]
    fn owner_teacher_is_owner_not_department_peer() {
        let me = Actor::new("bob", Role::Teacher, Some("math".into()));
        let b = booking("bob", Some("math"), BookingStatus::Pending);
        assert_eq!(relationship(&me, &b), Relationship::Owner);
        assert!(can_perform(&me, Action::UpdateSchedule, Some(&b)));
    }

    #[test]
    fn same_department_teacher_sees_pending_and_approved_only() {
        let teacher = Actor::new("carol", Role::Teacher, Some("physics".into()));
        for (status, visible) in [
            (BookingStatus::Pending, true),
            (approved(), true),
            (rejected(), false),
            (cancelled(), false),
        ] {
            let b = booking("alice", Some("physics"), status);
            assert_eq!(relationship(&teacher, &b), Relationship::SameDepartmentTeacher);
            assert_eq!(can_perform(&teacher, Action::View, Some(&b)), visible);
            for action in [
                Action::UpdateSchedule,
                Action::Cancel,
                Action::Approve,
                Action::Reject,
                Action::Delete,
            ] {
                assert!(!can_perform(&teacher, action, Some(&b)));
            }
        }
    }

    #[test]
    fn same_department_student_is_other() {
        let peer = Actor::new("dave", Role::Student, Some("physics".into()));
        let b = booking("alice", Some("physics"), BookingStatus::Pending);
        assert_eq!(relationship(&peer, &b), Relationship::Other);
        assert!(!can_perform(&peer, Action::View, Some(&b)));
    }

    #[test]
    fn teacher_without_department_is_other() {
        let teacher = Actor::new("erin", Role::Teacher, None);
        let b = booking("alice", None, BookingStatus::Pending);
        assert_eq!(relationship(&teacher, &b), Relationship::Other);
    }

    #[test]
    fn others_see_only_approved() {
        let stranger = Actor::new("mallory", Role::Student, Some("history".into()));
        for (status, visible) in [
            (BookingStatus::Pending, false),
            (approved(), true),
            (rejected(), false),
            (cancelled(), false),
        ] {
            let b = booking("alice", Some("physics"), status);
            assert_eq!(can_perform(&stranger, Action::View, Some(&b)), visible);
            assert!(!can_perform(&stranger, Action::Cancel, Some(&b)));
            assert!(!can_perform(&stranger, Action::Delete, Some(&b)));
        }
    }

    #[test]
    fn cancel_only_request_downgrades_for_owner() {
        let b = booking("alice", None, approved());
        assert!(!authorize(&alice(), Action::UpdateSchedule, &b, false));
        assert!(authorize(&alice(), Action::UpdateSchedule, &b, true));
        assert!(authorize(&alice(), Action::Delete, &b, true));
        // the downgrade never grants approvals or helps strangers
        assert!(!authorize(&alice(), Action::Approve, &b, true));
        let stranger = Actor::new("mallory", Role::Student, None);
        assert!(!authorize(&stranger, Action::UpdateSchedule, &b, true));
    }
}
