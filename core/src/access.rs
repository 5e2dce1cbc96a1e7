//! Role-aware access policy.
//!
//! | Role    | Sees / mutates                                   |
//! |---------|--------------------------------------------------|
//! | `user`  | tickets they created                             |
//! | `agent` | tickets they created or are assigned to          |
//! | `admin` | everything; the only role that may (re)assign    |
//!
//! The policy is a set of pure predicates. Listing operations apply
//! [`filter`] over the full ticket set and intersect it with
//! [`matches_search`].

use crate::error::{HelpdeskError, Result};
use crate::types::{Identity, Role, Ticket};

/// Outcome of the visibility filter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Visibility {
    /// The caller may see the ticket
    Visible,
    /// The caller may not know the ticket exists
    Hidden,
}

/// Outcome of a mutation authorization check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    /// Go ahead
    Allowed,
    /// Not permitted
    Forbidden,
}

impl Decision {
    /// Turn a denial into [`HelpdeskError::Forbidden`].
    ///
    /// # Errors
    ///
    /// Returns [`HelpdeskError::Forbidden`] with `message` when denied.
    pub fn into_result(self, message: &str) -> Result<()> {
        match self {
            Self::Allowed => Ok(()),
            Self::Forbidden => Err(HelpdeskError::forbidden(message)),
        }
    }
}

/// Kinds of ticket mutation the policy distinguishes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MutationKind {
    /// Edit title, description, priority or status
    Update,
    /// Add a comment
    Comment,
    /// Change the assignee
    Assign,
}

/// Whether `identity` may see `ticket`.
#[must_use]
pub fn filter(identity: &Identity, ticket: &Ticket) -> Visibility {
    let visible = match identity.role {
        Role::Admin => true,
        Role::Agent => {
            ticket.created_by == identity.user_id || ticket.assignee == Some(identity.user_id)
        }
        Role::User => ticket.created_by == identity.user_id,
    };
    if visible {
        Visibility::Visible
    } else {
        Visibility::Hidden
    }
}

/// Shorthand for `filter(..) == Visible`.
#[must_use]
pub fn is_visible(identity: &Identity, ticket: &Ticket) -> bool {
    filter(identity, ticket) == Visibility::Visible
}

/// Whether `identity` may perform `action` on `ticket`.
#[must_use]
pub fn authorize_mutation(identity: &Identity, ticket: &Ticket, action: MutationKind) -> Decision {
    let allowed = match action {
        MutationKind::Assign => identity.is_admin(),
        MutationKind::Update | MutationKind::Comment => is_visible(identity, ticket),
    };
    if allowed {
        Decision::Allowed
    } else {
        Decision::Forbidden
    }
}

/// Whether `identity` may list agent identities.
#[must_use]
pub const fn authorize_list_agents(identity: &Identity) -> Decision {
    if identity.is_admin() {
        Decision::Allowed
    } else {
        Decision::Forbidden
    }
}

/// Case-insensitive substring search over a ticket's text corpus.
///
/// `corpus` is the title, the description and every comment text. An empty
/// corpus never matches.
#[must_use]
pub fn matches_search<'a, I>(query: &str, corpus: I) -> bool
where
    I: IntoIterator<Item = &'a str>,
{
    let needle = query.to_lowercase();
    corpus
        .into_iter()
        .any(|text| text.to_lowercase().contains(&needle))
}

/// Normalize a raw search parameter: blank means "no search".
#[must_use]
pub fn search_term(raw: Option<&str>) -> Option<&str> {
    raw.map(str::trim).filter(|term| !term.is_empty())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::{Priority, Status, TicketId, UserId};
    use chrono::Utc;

    fn ticket(created_by: UserId, assignee: Option<UserId>) -> Ticket {
        let now = Utc::now();
        Ticket {
            id: TicketId::new(),
            title: "VPN down".to_string(),
            description: "Cannot connect from home".to_string(),
            priority: Priority::Medium,
            status: Status::Open,
            created_by,
            assignee,
            sla_deadline: now,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn user_sees_only_own_tickets() {
        let me = Identity::new(UserId::new(), Role::User);
        let mine = ticket(me.user_id, None);
        let theirs = ticket(UserId::new(), Some(me.user_id));

        assert_eq!(filter(&me, &mine), Visibility::Visible);
        // Being the assignee does not help a plain user.
        assert_eq!(filter(&me, &theirs), Visibility::Hidden);
    }

    #[test]
    fn agent_sees_created_or_assigned() {
        let agent = Identity::new(UserId::new(), Role::Agent);
        assert!(is_visible(&agent, &ticket(agent.user_id, None)));
        assert!(is_visible(&agent, &ticket(UserId::new(), Some(agent.user_id))));
        assert!(!is_visible(&agent, &ticket(UserId::new(), Some(UserId::new()))));
    }

    #[test]
    fn admin_sees_everything() {
        let admin = Identity::new(UserId::new(), Role::Admin);
        assert!(is_visible(&admin, &ticket(UserId::new(), None)));
    }

    #[test]
    fn only_admin_may_assign() {
        let agent = Identity::new(UserId::new(), Role::Agent);
        let admin = Identity::new(UserId::new(), Role::Admin);
        let t = ticket(agent.user_id, None);

        assert_eq!(
            authorize_mutation(&agent, &t, MutationKind::Assign),
            Decision::Forbidden
        );
        assert_eq!(
            authorize_mutation(&agent, &t, MutationKind::Update),
            Decision::Allowed
        );
        assert_eq!(
            authorize_mutation(&admin, &t, MutationKind::Assign),
            Decision::Allowed
        );
    }

    #[test]
    fn listing_agents_is_admin_only() {
        let user = Identity::new(UserId::new(), Role::User);
        assert!(authorize_list_agents(&user).into_result("nope").is_err());
        let admin = Identity::new(UserId::new(), Role::Admin);
        assert!(authorize_list_agents(&admin).into_result("nope").is_ok());
    }

    #[test]
    fn search_is_case_insensitive_substring() {
        assert!(matches_search("vpn", ["VPN down", "other"]));
        assert!(matches_search("FROM HOME", ["x", "Cannot connect from home"]));
        assert!(!matches_search("printer", ["VPN down"]));
    }

    #[test]
    fn empty_corpus_never_matches() {
        assert!(!matches_search("anything", std::iter::empty::<&str>()));
    }

    #[test]
    fn blank_search_is_no_search() {
        assert_eq!(search_term(Some("   ")), None);
        assert_eq!(search_term(None), None);
        assert_eq!(search_term(Some(" vpn ")), Some("vpn"));
    }
}
