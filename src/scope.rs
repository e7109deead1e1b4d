//! Search scope, mirroring the collaborator transport's own `Scope` enum
//! so commands can convert to it with a trivial `From` impl.

/// LDAP search scope ([RFC 4511 §4.5.1.2](https://tools.ietf.org/html/rfc4511#section-4.5.1.2)).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scope {
    /// The base entry itself.
    Base,
    /// Immediate children of the base entry.
    OneLevel,
    /// The base entry and all of its descendants.
    Subtree,
}

impl From<Scope> for ldap3::Scope {
    fn from(scope: Scope) -> ldap3::Scope {
        match scope {
            Scope::Base => ldap3::Scope::Base,
            Scope::OneLevel => ldap3::Scope::OneLevel,
            Scope::Subtree => ldap3::Scope::Subtree,
        }
    }
}
