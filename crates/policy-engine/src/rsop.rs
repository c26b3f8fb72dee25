//! Resultant Set of Policy simulation for a computer object.

use std::collections::HashSet;

use tracing::{debug, warn};

use gpfleet_core::topology::{rdn_attribute, split_dn, GpoTopology, RsopAppliedGpo, RsopResult};

/// A link picked up during the walk, before ranking.
struct Candidate {
    applied: RsopAppliedGpo,
    /// 0 is the computer's own OU; larger is closer to the root.
    depth: usize,
}

/// Walks the computer's OU chain bottom-up and ranks the links that survive
/// blocking. Missing OUs and unknown GPOs are skipped, never reported as errors.
pub fn simulate_computer_rsop(computer_dn: &str, topology: &GpoTopology) -> RsopResult {
    let mut candidates = Vec::new();
    let mut blocked = false;

    for (depth, ou_dn) in resolution_chain(computer_dn, topology).into_iter().enumerate() {
        let Some(ou) = topology.ou(&ou_dn) else {
            debug!(ou = %ou_dn, "OU missing from topology; skipping");
            continue;
        };

        for link in &ou.links {
            if !link.enabled {
                continue;
            }
            if blocked && !link.enforced {
                debug!(ou = %ou_dn, gpo = %link.gpo, "link blocked by inheritance");
                continue;
            }
            let Some(gpo) = topology.gpo(&link.gpo) else {
                warn!(ou = %ou_dn, gpo = %link.gpo, "link references unknown GPO; dropping");
                continue;
            };
            if !gpo.enabled {
                debug!(gpo = %gpo.name, "GPO disabled; dropping");
                continue;
            }
            candidates.push(Candidate {
                applied: RsopAppliedGpo {
                    gpo_name: gpo.name.clone(),
                    gpo_guid: gpo.guid,
                    enforced: link.enforced,
                    precedence: 0,
                    link_dn: ou.dn.clone(),
                    link_order: link.link_order,
                },
                depth,
            });
        }

        if ou.block_inheritance {
            blocked = true;
        }
    }

    candidates.sort_by(|a, b| {
        b.applied
            .enforced
            .cmp(&a.applied.enforced)
            .then(a.applied.link_order.cmp(&b.applied.link_order))
            .then_with(|| {
                if a.applied.enforced {
                    b.depth.cmp(&a.depth)
                } else {
                    a.depth.cmp(&b.depth)
                }
            })
    });

    let mut seen = HashSet::new();
    let applied = candidates
        .into_iter()
        .filter(|candidate| seen.insert(candidate.applied.gpo_guid))
        .enumerate()
        .map(|(rank, candidate)| RsopAppliedGpo {
            precedence: rank as u32 + 1,
            ..candidate.applied
        })
        .collect();

    RsopResult {
        computer_dn: computer_dn.to_string(),
        applied,
    }
}

/// OU suffixes of `computer_dn` from the parent OU upward, followed by the
/// domain root when the topology knows it.
fn resolution_chain(computer_dn: &str, topology: &GpoTopology) -> Vec<String> {
    let parts = split_dn(computer_dn);
    let mut chain = Vec::new();

    for index in 1..parts.len() {
        if rdn_attribute(&parts[index]).as_deref() == Some("OU") {
            chain.push(parts[index..].join(","));
        }
    }

    if let Some(index) = parts
        .iter()
        .position(|part| rdn_attribute(part).as_deref() == Some("DC"))
    {
        let domain = parts[index..].join(",");
        if topology.ou(&domain).is_some() {
            chain.push(domain);
        }
    }

    chain
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpfleet_core::topology::{GpoInfo, GpoLinkInfo, OuGpoLink};
    use uuid::Uuid;

    const COMPUTER: &str = "CN=PC01,OU=A,OU=B,OU=C,DC=corp,DC=local";
    const OU_A: &str = "OU=A,OU=B,OU=C,DC=corp,DC=local";
    const OU_B: &str = "OU=B,OU=C,DC=corp,DC=local";
    const OU_C: &str = "OU=C,DC=corp,DC=local";
    const DOMAIN: &str = "DC=corp,DC=local";

    fn gpo(name: &str) -> GpoInfo {
        GpoInfo {
            guid: Uuid::new_v4(),
            name: name.to_string(),
            enabled: true,
        }
    }

    fn link(gpo: &GpoInfo, enforced: bool, link_order: u32) -> GpoLinkInfo {
        GpoLinkInfo {
            gpo: gpo.guid,
            enabled: true,
            enforced,
            link_order,
        }
    }

    fn ou(dn: &str, block_inheritance: bool, links: Vec<GpoLinkInfo>) -> OuGpoLink {
        OuGpoLink {
            dn: dn.to_string(),
            block_inheritance,
            links,
        }
    }

    #[test]
    fn test_block_inheritance_spares_enforced_links() {
        let on_b = gpo("Enforced-B");
        let on_c = gpo("Inherited-C");
        let topology = GpoTopology::new(
            vec![on_b.clone(), on_c.clone()],
            vec![
                ou(OU_A, true, Vec::new()),
                ou(OU_B, false, vec![link(&on_b, true, 1)]),
                ou(OU_C, false, vec![link(&on_c, false, 1)]),
            ],
        );

        let result = simulate_computer_rsop(COMPUTER, &topology);
        assert_eq!(result.gpo_names(), vec!["Enforced-B"]);
        assert_eq!(result.applied[0].precedence, 1);
        assert!(result.applied[0].enforced);
    }

    #[test]
    fn test_link_order_breaks_ties_within_an_ou() {
        let second = gpo("Second");
        let first = gpo("First");
        let topology = GpoTopology::new(
            vec![second.clone(), first.clone()],
            vec![ou(OU_A, false, vec![link(&second, false, 2), link(&first, false, 1)])],
        );

        let result = simulate_computer_rsop(COMPUTER, &topology);
        assert_eq!(result.gpo_names(), vec!["First", "Second"]);
        let precedences: Vec<u32> = result.applied.iter().map(|gpo| gpo.precedence).collect();
        assert_eq!(precedences, vec![1, 2]);
    }

    #[test]
    fn test_enforced_ties_prefer_root_and_plain_ties_prefer_computer() {
        let enforced_a = gpo("Enforced-A");
        let enforced_c = gpo("Enforced-C");
        let plain_a = gpo("Plain-A");
        let plain_c = gpo("Plain-C");
        let topology = GpoTopology::new(
            vec![enforced_a.clone(), enforced_c.clone(), plain_a.clone(), plain_c.clone()],
            vec![
                ou(OU_A, false, vec![link(&enforced_a, true, 1), link(&plain_a, false, 2)]),
                ou(OU_C, false, vec![link(&enforced_c, true, 1), link(&plain_c, false, 2)]),
            ],
        );

        let result = simulate_computer_rsop(COMPUTER, &topology);
        assert_eq!(result.gpo_names(), vec!["Enforced-C", "Enforced-A", "Plain-A", "Plain-C"]);
    }

    #[test]
    fn test_missing_ous_and_unknown_gpos_are_skipped() {
        let known = gpo("Known");
        let mut disabled = gpo("Disabled");
        disabled.enabled = false;
        let mut off_link = link(&known, false, 3);
        off_link.enabled = false;
        let topology = GpoTopology::new(
            vec![known.clone(), disabled.clone()],
            vec![ou(
                OU_B,
                false,
                vec![
                    GpoLinkInfo {
                        gpo: Uuid::new_v4(),
                        enabled: true,
                        enforced: false,
                        link_order: 1,
                    },
                    link(&disabled, false, 2),
                    off_link,
                    link(&known, false, 4),
                ],
            )],
        );

        let result = simulate_computer_rsop(COMPUTER, &topology);
        assert_eq!(result.computer_dn, COMPUTER);
        assert_eq!(result.gpo_names(), vec!["Known"]);
        assert_eq!(result.applied[0].link_dn, OU_B);
    }

    #[test]
    fn test_domain_root_is_final_step() {
        let domain_gpo = gpo("Default Domain Policy");
        let ou_gpo = gpo("Sales");
        let topology = GpoTopology::new(
            vec![domain_gpo.clone(), ou_gpo.clone()],
            vec![
                ou(OU_C, true, vec![link(&ou_gpo, false, 1)]),
                ou(DOMAIN, false, vec![link(&domain_gpo, false, 1)]),
            ],
        );
        let blocked = simulate_computer_rsop(COMPUTER, &topology);
        assert_eq!(blocked.gpo_names(), vec!["Sales"]);

        let topology = GpoTopology::new(
            vec![domain_gpo.clone(), ou_gpo.clone()],
            vec![
                ou(OU_C, false, vec![link(&ou_gpo, false, 1)]),
                ou(DOMAIN, false, vec![link(&domain_gpo, false, 1)]),
            ],
        );
        let inherited = simulate_computer_rsop(COMPUTER, &topology);
        assert_eq!(inherited.gpo_names(), vec!["Sales", "Default Domain Policy"]);
    }

    #[test]
    fn test_gpo_linked_twice_keeps_best_rank() {
        let shared = gpo("Shared");
        let topology = GpoTopology::new(
            vec![shared.clone()],
            vec![
                ou(OU_A, false, vec![link(&shared, false, 1)]),
                ou(OU_C, false, vec![link(&shared, true, 1)]),
            ],
        );
        let result = simulate_computer_rsop(COMPUTER, &topology);
        assert_eq!(result.applied.len(), 1);
        assert!(result.applied[0].enforced);
        assert_eq!(result.applied[0].link_dn, OU_C);
    }
}
