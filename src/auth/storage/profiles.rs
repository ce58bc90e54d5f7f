//! Per-role profile repositories

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

use super::r#trait::ProfileRepository;
use crate::auth::{errors::AuthError, types::Role};

fn as_object(profile: Value) -> Result<Map<String, Value>, AuthError> {
    match profile {
        Value::Null => Ok(Map::new()),
        Value::Object(map) => Ok(map),
        _ => Err(AuthError::validation("Profile must be an object")),
    }
}

fn require_text(map: &Map<String, Value>, fields: &[&str]) -> Result<(), AuthError> {
    let problems: Vec<String> = fields
        .iter()
        .filter(|field| {
            !map.get(**field)
                .and_then(Value::as_str)
                .is_some_and(|s| !s.trim().is_empty())
        })
        .map(|field| format!("Profile field '{field}' is required"))
        .collect();
    if problems.is_empty() {
        Ok(())
    } else {
        Err(AuthError::ValidationFailed(problems))
    }
}

pub struct StudentProfiles;

impl ProfileRepository for StudentProfiles {
    fn role(&self) -> Role {
        Role::Student
    }

    fn prepare(&self, profile: Value) -> Result<Value, AuthError> {
        let map = as_object(profile)?;
        require_text(&map, &["first_name", "last_name"])?;
        Ok(Value::Object(map))
    }
}

pub struct CompanyProfiles;

impl ProfileRepository for CompanyProfiles {
    fn role(&self) -> Role {
        Role::Company
    }

    fn prepare(&self, profile: Value) -> Result<Value, AuthError> {
        let map = as_object(profile)?;
        require_text(&map, &["company_name"])?;
        Ok(Value::Object(map))
    }
}

/// Admin profiles carry the permission list, empty unless given
pub struct AdminProfiles;

impl ProfileRepository for AdminProfiles {
    fn role(&self) -> Role {
        Role::Admin
    }

    fn prepare(&self, profile: Value) -> Result<Value, AuthError> {
        let mut map = as_object(profile)?;
        let permissions = match map.remove("permissions") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) if items.iter().all(Value::is_string) => items,
            Some(_) => {
                return Err(AuthError::validation(
                    "Profile field 'permissions' must be a list of strings",
                ))
            }
        };
        map.insert("permissions".to_string(), Value::Array(permissions));
        Ok(Value::Object(map))
    }
}

/// Role to profile repository map
#[derive(Clone)]
pub struct ProfileRegistry {
    repositories: HashMap<Role, Arc<dyn ProfileRepository>>,
}

impl ProfileRegistry {
    pub fn empty() -> Self {
        Self {
            repositories: HashMap::new(),
        }
    }

    pub fn register(mut self, repository: Arc<dyn ProfileRepository>) -> Self {
        self.repositories.insert(repository.role(), repository);
        self
    }

    pub fn for_role(&self, role: Role) -> Result<Arc<dyn ProfileRepository>, AuthError> {
        self.repositories
            .get(&role)
            .cloned()
            .ok_or_else(|| AuthError::Internal(format!("no profile repository for role {role}")))
    }
}

impl Default for ProfileRegistry {
    fn default() -> Self {
        Self::empty()
            .register(Arc::new(StudentProfiles))
            .register(Arc::new(CompanyProfiles))
            .register(Arc::new(AdminProfiles))
    }
}
