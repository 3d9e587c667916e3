//! Mailing-list routing: ordered regex rules mapped to list handlers.
//!
//! Rules are tried in ascending `seq` order. `route()` reports the first rule
//! whose pattern matches; `resolve()` keeps walking the matching rules until
//! a handler actually produces recipients, so a catch-all `UserEmail` rule
//! can sit behind an identically keyed `PlainList` rule.

use regex::{Captures, Regex};
use serde::Serialize;
use tracing::{debug, warn};

use super::model::{EmailListRule, ListHandler};
use crate::error::DatabaseError;
use crate::program::Audience;
use crate::store::Database;

/// What a matched local part addresses, decoded from the rule's captures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ListRoute {
    Section {
        program: String,
        class_id: i64,
        section_index: i64,
        audience: Audience,
    },
    Class {
        program: String,
        class_id: i64,
        audience: Audience,
    },
    Plain {
        name: String,
    },
    User {
        username: String,
    },
}

/// Final outcome of routing an address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedList {
    pub rule_id: i64,
    pub handler: ListHandler,
    pub route: ListRoute,
    pub admin_hold: bool,
    pub cc_all: bool,
    pub recipients: Vec<String>,
}

struct CompiledRule {
    rule: EmailListRule,
    regex: Regex,
}

/// An ordered, compiled rule table.
pub struct EmailListRouter {
    rules: Vec<CompiledRule>,
}

impl EmailListRouter {
    /// Compile rules into evaluation order. Rules whose pattern does not compile are skipped.
    pub fn new(mut rules: Vec<EmailListRule>) -> Self {
        rules.sort_by_key(|r| (r.seq, r.id));
        let rules = rules
            .into_iter()
            .filter_map(|rule| match Regex::new(&rule.regex) {
                Ok(regex) => Some(CompiledRule { rule, regex }),
                Err(e) => {
                    warn!(rule_id = rule.id, regex = %rule.regex, error = %e, "Skipping email list with invalid regex");
                    None
                }
            })
            .collect();
        Self { rules }
    }

    /// Build a router from the persisted rule table.
    pub async fn load(db: &dyn Database) -> Result<Self, DatabaseError> {
        Ok(Self::new(db.list_email_rules().await?))
    }

    /// Number of usable rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Every rule matching `local_part`, in evaluation order, with its decoded route.
    pub fn matches<'a>(
        &'a self,
        local_part: &'a str,
    ) -> impl Iterator<Item = (&'a EmailListRule, ListRoute)> + 'a {
        self.rules.iter().filter_map(move |compiled| {
            let caps = compiled.regex.captures(local_part)?;
            match decode_route(compiled.rule.handler, &caps) {
                Some(route) => Some((&compiled.rule, route)),
                None => {
                    debug!(
                        rule_id = compiled.rule.id,
                        handler = %compiled.rule.handler,
                        "Rule matched but its captures do not fit the handler"
                    );
                    None
                }
            }
        })
    }

    /// The first matching rule for `local_part`.
    pub fn route<'a>(&'a self, local_part: &'a str) -> Option<(&'a EmailListRule, ListRoute)> {
        self.matches(local_part).next()
    }

    /// Resolve an address (or bare local part) to its final recipients.
    ///
    /// Returns `None` when no matching handler yields anyone.
    pub async fn resolve(
        &self,
        db: &dyn Database,
        address: &str,
    ) -> Result<Option<ResolvedList>, DatabaseError> {
        let local_part = normalize_local_part(address);

        for (rule, route) in self.matches(&local_part) {
            let recipients = recipients_for(db, &route).await?;
            if recipients.is_empty() {
                debug!(rule_id = rule.id, handler = %rule.handler, address = %local_part, "Handler declined address");
                continue;
            }
            debug!(
                rule_id = rule.id,
                handler = %rule.handler,
                address = %local_part,
                count = recipients.len(),
                "Address resolved"
            );
            return Ok(Some(ResolvedList {
                rule_id: rule.id,
                handler: rule.handler,
                route,
                admin_hold: rule.admin_hold,
                cc_all: rule.cc_all,
                recipients,
            }));
        }

        Ok(None)
    }
}

/// `S123C1-Students@site.org` → `s123c1-students`.
pub fn normalize_local_part(address: &str) -> String {
    let local = match address.rsplit_once('@') {
        Some((local, _domain)) => local,
        None => address,
    };
    local.trim().to_lowercase()
}

fn decode_route(handler: ListHandler, caps: &Captures<'_>) -> Option<ListRoute> {
    let group = |i: usize| caps.get(i).map(|m| m.as_str());

    match handler {
        ListHandler::SectionList => Some(ListRoute::Section {
            program: group(1)?.to_string(),
            class_id: group(2)?.parse().ok()?,
            section_index: group(3)?.parse().ok()?,
            audience: group(4)?.parse().ok()?,
        }),
        ListHandler::ClassList => Some(ListRoute::Class {
            program: group(1)?.to_string(),
            class_id: group(2)?.parse().ok()?,
            audience: group(3)?.parse().ok()?,
        }),
        ListHandler::PlainList => Some(ListRoute::Plain {
            name: group(1).or(group(0))?.to_string(),
        }),
        ListHandler::UserEmail => Some(ListRoute::User {
            username: group(1).or(group(0))?.to_string(),
        }),
    }
}

async fn recipients_for(db: &dyn Database, route: &ListRoute) -> Result<Vec<String>, DatabaseError> {
    match route {
        ListRoute::Section {
            program,
            class_id,
            section_index,
            audience,
        } => class_recipients(db, program, *class_id, Some(*section_index), *audience).await,
        ListRoute::Class {
            program,
            class_id,
            audience,
        } => class_recipients(db, program, *class_id, None, *audience).await,
        ListRoute::Plain { name } => {
            let Some(redirect) = db.get_plain_redirect(name).await? else {
                return Ok(Vec::new());
            };
            let mut out = Vec::new();
            for entry in redirect
                .destination
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
            {
                if entry.contains('@') {
                    out.push(entry.to_string());
                } else {
                    match db.get_user_by_username(entry).await? {
                        Some(user) if !user.email.is_empty() => out.push(user.email),
                        _ => warn!(redirect = %redirect.original, entry = entry, "Redirect names unknown user"),
                    }
                }
            }
            Ok(out)
        }
        ListRoute::User { username } => Ok(db
            .get_user_by_username(username)
            .await?
            .map(|u| u.email)
            .filter(|email| !email.is_empty())
            .into_iter()
            .collect()),
    }
}

async fn class_recipients(
    db: &dyn Database,
    program: &str,
    class_id: i64,
    section_index: Option<i64>,
    audience: Audience,
) -> Result<Vec<String>, DatabaseError> {
    match db.get_class(class_id).await? {
        Some(class) if class.program_code.eq_ignore_ascii_case(program) => Ok(db
            .section_members(class_id, section_index, audience)
            .await?
            .into_iter()
            .map(|u| u.email)
            .collect()),
        _ => Ok(Vec::new()),
    }
}
