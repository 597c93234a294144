use crate::{
    error::IntegrityError,
    models::{Binding, Policy, PolicyBinding},
};

/// Rebuild a policy from the flat rows of one resource.
///
/// Storage returns rows in no particular order, so they are sorted by
/// (binding index, member index) before grouping. The returned policy carries
/// no etag.
pub fn policy_from_rows(mut rows: Vec<PolicyBinding>) -> Result<Policy, IntegrityError> {
    rows.sort_by_key(|row| (row.binding_index, row.member_index));

    let mut bindings: Vec<Binding> = Vec::new();
    let mut current_index = None;
    for row in rows {
        match bindings.last_mut() {
            Some(binding) if current_index == Some(row.binding_index) => {
                if binding.role != row.role {
                    return Err(IntegrityError::ConflictingRoles {
                        resource: row.resource,
                        binding_index: row.binding_index,
                        expected: binding.role.clone(),
                        found: row.role,
                    });
                }
                binding.members.push(row.member);
            }
            _ => {
                current_index = Some(row.binding_index);
                bindings.push(Binding {
                    role: row.role,
                    members: vec![row.member],
                });
            }
        }
    }

    Ok(Policy::new(bindings))
}

/// Flatten a policy into the rows stored for `resource`
pub fn policy_to_rows(resource: &str, policy: &Policy) -> Vec<PolicyBinding> {
    policy
        .bindings
        .iter()
        .enumerate()
        .flat_map(|(i, binding)| {
            binding.members.iter().enumerate().map(move |(j, member)| PolicyBinding {
                resource: resource.to_string(),
                binding_index: row_index(i),
                role: binding.role.clone(),
                member_index: row_index(j),
                member: member.clone(),
            })
        })
        .collect()
}

fn row_index(index: usize) -> i64 {
    i64::try_from(index).unwrap_or(i64::MAX)
}
