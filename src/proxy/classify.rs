//! Split live proxies back into normal and anonymous buckets

use crate::proxy::models::{Candidate, ClassifiedValidSet, OriginTag};
use crate::proxy::session::CandidateSet;
use std::collections::HashSet;

/// Partition `live` by the origin tag each candidate carried in `set`.
///
/// Candidates not in `set` are ignored. An address seen in both normal and
/// anonymous sources lands in `anonymous` only.
pub fn classify(set: &CandidateSet, live: &[Candidate]) -> ClassifiedValidSet {
    let mut normal = Vec::new();
    let mut anonymous = Vec::new();

    for candidate in live {
        match set.tag_of(candidate) {
            Some(OriginTag::Normal) => normal.push(*candidate),
            Some(OriginTag::Anonymous) => anonymous.push(*candidate),
            None => {}
        }
    }

    let anonymous_set: HashSet<Candidate> = anonymous.iter().copied().collect();
    normal.retain(|candidate| !anonymous_set.contains(candidate));

    normal.sort();
    normal.dedup();
    anonymous.sort();
    anonymous.dedup();

    ClassifiedValidSet { normal, anonymous }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::session::CrawlSession;

    fn c(raw: &str) -> Candidate {
        Candidate::parse(raw).unwrap()
    }

    #[test]
    fn test_classify_by_tag() {
        let mut session = CrawlSession::new();
        session.extend(OriginTag::Normal, vec![c("1.1.1.1:80"), c("2.2.2.2:80")]);
        session.extend(OriginTag::Anonymous, vec![c("3.3.3.3:80")]);
        let set = session.take_unique();

        let result = classify(&set, &[c("3.3.3.3:80"), c("2.2.2.2:80"), c("1.1.1.1:80")]);

        assert_eq!(result.normal, vec![c("1.1.1.1:80"), c("2.2.2.2:80")]);
        assert_eq!(result.anonymous, vec![c("3.3.3.3:80")]);
    }

    #[test]
    fn test_conflict_goes_to_anonymous() {
        let mut session = CrawlSession::new();
        session.extend(OriginTag::Normal, vec![c("9.9.9.9:3128")]);
        session.extend(OriginTag::Anonymous, vec![c("9.9.9.9:3128")]);
        let set = session.take_unique();

        let result = classify(&set, &[c("9.9.9.9:3128")]);

        assert!(result.normal.is_empty());
        assert_eq!(result.anonymous, vec![c("9.9.9.9:3128")]);
    }

    #[test]
    fn test_dead_and_unknown_candidates_excluded() {
        let mut session = CrawlSession::new();
        session.extend(OriginTag::Normal, vec![c("1.1.1.1:80"), c("2.2.2.2:80")]);
        let set = session.take_unique();

        let result = classify(&set, &[c("1.1.1.1:80"), c("7.7.7.7:80")]);

        assert_eq!(result.normal, vec![c("1.1.1.1:80")]);
        assert!(result.anonymous.is_empty());
        assert_eq!(result.total(), 1);
    }
}
