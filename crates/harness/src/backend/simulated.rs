//! Stateful in-memory vendor.
//!
//! [`SimulatedBackend`] keeps organizations, users, file systems, S3 buckets,
//! IAM policies and containers in one resource model guarded by a single
//! [`parking_lot::Mutex`]. Every handler runs its whole read-modify-write
//! under that lock, so concurrent calls are linearized and uniqueness checks
//! cannot race.
//!
//! The model starts with the `Root` organization and a cluster administrator
//! (`admin` / `adminPassword`). Users, file systems and their names are scoped
//! to the organization carried by the caller's token; file-system groups,
//! buckets, policies and containers are cluster-wide.
//!
//! Client mistakes (unknown resources, duplicate names) are answered with
//! `404` and `400`. A token naming an organization the model does not know,
//! or an internal index pointing at nothing, is a [`HarnessError::BackendFault`].

use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Value, json};
use tracing::debug;
use uuid::Uuid;
use vendorsim_authn::TokenService;

use super::{ApiResponse, BackendMode, OperationCall, VendorBackend, login_tokens};
use crate::{
    error::{HarnessError, HarnessResult},
    roles::Role,
};

/// Uid of the organization every cluster starts with.
pub const ROOT_ORG_UID: &str = "00000000-0000-0000-0000-000000000000";

/// Name of the root organization; `login` uses it when no `org` is given.
pub const ROOT_ORG_NAME: &str = "Root";

/// Username of the built-in cluster administrator.
pub const ADMIN_USERNAME: &str = "admin";

/// Password of the built-in cluster administrator.
pub const ADMIN_PASSWORD: &str = "adminPassword";

const ROOT_QUOTA: u64 = 100_000;
const CLUSTER_GUID: &str = "3e0a9c1e-6f25-4c59-9b8e-1c2d7f4a5b60";
const DEFAULT_RETENTION_SECS: u64 = 86_400;
const DEFAULT_START_DEMOTE_SECS: u64 = 1_800;
const CONTAINER_CORES: u32 = 1;

#[derive(Debug, Clone, Serialize)]
struct Organization {
    uid: String,
    id: u64,
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    total_quota: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ssd_quota: Option<u64>,
}

#[derive(Serialize)]
struct OrganizationView<'a> {
    #[serde(flatten)]
    org: &'a Organization,
    total_allocated: u64,
    ssd_allocated: u64,
}

#[derive(Debug, Clone, Serialize)]
struct User {
    uid: String,
    username: String,
    role: Role,
    org_id: u64,
    source: String,
    #[serde(skip)]
    org_uid: String,
    #[serde(skip)]
    password: String,
    #[serde(skip)]
    revoked: bool,
}

impl User {
    fn new(username: &str, password: &str, role: Role, org: &Organization) -> Self {
        Self {
            uid: new_uid(),
            username: username.to_owned(),
            role,
            org_id: org.id,
            source: "Internal".to_owned(),
            org_uid: org.uid.clone(),
            password: password.to_owned(),
            revoked: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct FileSystemGroup {
    uid: String,
    id: String,
    name: String,
    target_ssd_retention: u64,
    start_demote: u64,
}

#[derive(Debug, Clone, Serialize)]
struct FileSystem {
    uid: String,
    id: String,
    name: String,
    group_name: String,
    total_budget: u64,
    ssd_budget: u64,
    auth_required: bool,
    is_encrypted: bool,
    is_ready: bool,
    status: String,
    #[serde(skip)]
    org_uid: String,
}

#[derive(Debug, Clone, Serialize)]
struct Bucket {
    name: String,
    path: String,
    hard_limit_bytes: u64,
    used_bytes: u64,
    #[serde(skip)]
    policy: String,
}

#[derive(Serialize)]
struct BucketList<'a> {
    buckets: Vec<&'a Bucket>,
}

#[derive(Debug, Clone, Serialize)]
struct LifecycleRule {
    id: String,
    enabled: bool,
    expiry_days: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    prefix: Option<String>,
}

#[derive(Serialize)]
struct LifecycleRules<'a> {
    bucket: &'a str,
    rules: &'a [LifecycleRule],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
enum RunState {
    Up,
    Down,
}

#[derive(Debug, Clone, Serialize)]
struct Container {
    uid: String,
    hostname: String,
    ips: Vec<String>,
    status: RunState,
    mode: String,
    cores: u32,
}

#[derive(Debug, Clone, Serialize)]
struct Process {
    uid: String,
    hostname: String,
    status: RunState,
    mode: String,
    roles: Vec<String>,
    #[serde(skip)]
    container_uid: String,
}

#[derive(Deserialize)]
struct LoginRequest {
    username: String,
    password: String,
    org: Option<String>,
}

#[derive(Deserialize)]
struct CreateOrganizationRequest {
    name: String,
    username: String,
    password: String,
    total_quota: Option<u64>,
    ssd_quota: Option<u64>,
}

#[derive(Deserialize)]
struct RenameRequest {
    new_name: String,
}

#[derive(Deserialize)]
struct SetOrganizationLimitRequest {
    total_quota: Option<u64>,
    ssd_quota: Option<u64>,
}

#[derive(Deserialize)]
struct CreateUserRequest {
    username: String,
    password: String,
    role: Role,
}

#[derive(Deserialize)]
struct UpdateUserPasswordRequest {
    old_password: String,
    new_password: String,
}

#[derive(Deserialize)]
struct UpdateUserRequest {
    role: Role,
}

#[derive(Deserialize)]
struct SetUserPasswordRequest {
    password: String,
}

#[derive(Deserialize)]
struct FileSystemGroupRequest {
    #[serde(alias = "new_name")]
    name: String,
    target_ssd_retention: Option<u64>,
    start_demote: Option<u64>,
}

#[derive(Deserialize)]
struct CreateFileSystemRequest {
    name: String,
    group_name: String,
    total_capacity: u64,
    ssd_capacity: Option<u64>,
    #[serde(default)]
    encrypted: bool,
    #[serde(default)]
    auth_required: bool,
}

#[derive(Deserialize)]
struct UpdateFileSystemRequest {
    new_name: Option<String>,
    total_capacity: Option<u64>,
    ssd_capacity: Option<u64>,
    auth_required: Option<bool>,
}

#[derive(Deserialize)]
struct CreateS3BucketRequest {
    bucket_name: String,
    policy: Option<String>,
    hard_quota: Option<String>,
}

#[derive(Deserialize)]
struct SetS3BucketPolicyRequest {
    bucket_policy: String,
}

#[derive(Deserialize)]
struct SetS3BucketQuotaRequest {
    hard_quota: String,
}

#[derive(Deserialize)]
struct CreateLifecycleRuleRequest {
    expiry_days: String,
    prefix: Option<String>,
}

#[derive(Deserialize)]
struct CreateS3PolicyRequest {
    policy_name: String,
    policy_file_content: Value,
}

#[derive(Deserialize)]
struct AttachS3PolicyRequest {
    policy_name: String,
    user_name: String,
}

#[derive(Deserialize)]
struct DetachS3PolicyRequest {
    user_name: String,
}

#[derive(Deserialize)]
struct AddContainerRequest {
    container_name: String,
    ip: String,
}

/// Number of resources of each kind held by a [`SimulatedBackend`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResourceCounts {
    /// Organizations, including `Root`.
    pub organizations: usize,
    /// Users across all organizations.
    pub users: usize,
    /// File-system groups.
    pub file_system_groups: usize,
    /// File systems across all organizations.
    pub file_systems: usize,
    /// S3 buckets.
    pub buckets: usize,
    /// S3 IAM policies.
    pub s3_policies: usize,
    /// Containers.
    pub containers: usize,
    /// Processes.
    pub processes: usize,
}

/// Identity established by a successful `login`.
struct Grant {
    subject: String,
    organization: String,
    role: Role,
}

#[derive(Debug)]
struct Model {
    organizations: BTreeMap<String, Organization>,
    /// Organization name to uid.
    org_names: BTreeMap<String, String>,
    next_org_id: u64,
    users: BTreeMap<String, User>,
    fs_groups: BTreeMap<String, FileSystemGroup>,
    next_group_id: u64,
    file_systems: BTreeMap<String, FileSystem>,
    next_fs_id: u64,
    buckets: BTreeMap<String, Bucket>,
    lifecycle_rules: BTreeMap<String, Vec<LifecycleRule>>,
    policies: BTreeMap<String, Value>,
    /// Username to attached policy name.
    policy_attachments: BTreeMap<String, String>,
    containers: BTreeMap<String, Container>,
    processes: BTreeMap<String, Process>,
}

impl Model {
    fn seeded() -> Self {
        let root = Organization {
            uid: ROOT_ORG_UID.to_owned(),
            id: 0,
            name: ROOT_ORG_NAME.to_owned(),
            total_quota: Some(ROOT_QUOTA),
            ssd_quota: Some(ROOT_QUOTA),
        };
        let admin = User::new(ADMIN_USERNAME, ADMIN_PASSWORD, Role::ClusterAdmin, &root);

        Self {
            org_names: BTreeMap::from([(root.name.clone(), root.uid.clone())]),
            organizations: BTreeMap::from([(root.uid.clone(), root)]),
            next_org_id: 1,
            users: BTreeMap::from([(admin.uid.clone(), admin)]),
            fs_groups: BTreeMap::new(),
            next_group_id: 0,
            file_systems: BTreeMap::new(),
            next_fs_id: 0,
            buckets: BTreeMap::new(),
            lifecycle_rules: BTreeMap::new(),
            policies: BTreeMap::new(),
            policy_attachments: BTreeMap::new(),
            containers: BTreeMap::new(),
            processes: BTreeMap::new(),
        }
    }

    fn counts(&self) -> ResourceCounts {
        ResourceCounts {
            organizations: self.organizations.len(),
            users: self.users.len(),
            file_system_groups: self.fs_groups.len(),
            file_systems: self.file_systems.len(),
            buckets: self.buckets.len(),
            s3_policies: self.policies.len(),
            containers: self.containers.len(),
            processes: self.processes.len(),
        }
    }

    fn authenticate(&mut self, request: &LoginRequest) -> HarnessResult<Option<Grant>> {
        let org_name =
            request.org.as_deref().filter(|org| !org.is_empty()).unwrap_or(ROOT_ORG_NAME);
        let Some(org_uid) = self.org_names.get(org_name).cloned() else {
            return Ok(None);
        };
        if !self.organizations.contains_key(&org_uid) {
            return Err(dangling("organization name index", org_name));
        }

        let Some(user) = self
            .users
            .values_mut()
            .find(|user| user.org_uid == org_uid && user.username == request.username)
        else {
            return Ok(None);
        };
        if user.password != request.password {
            return Ok(None);
        }

        user.revoked = false;
        Ok(Some(Grant { subject: user.uid.clone(), organization: org_uid, role: user.role }))
    }

    fn dispatch(&mut self, call: &OperationCall) -> HarnessResult<ApiResponse> {
        if let Some(auth) = &call.auth
            && self.users.get(&auth.subject).is_some_and(|user| user.revoked)
        {
            debug!(subject = %auth.subject, "call with revoked credentials");
            return Ok(ApiResponse::unauthorized());
        }

        match call.operation_id.as_str() {
            "getClusterStatus" => cluster_status(),

            "getOrganizations" => self.get_organizations(),
            "createOrganization" => self.create_organization(call),
            "getMultipleOrgExist" => render(self.organizations.len() > 1),
            "getOrganization" => self.organization_response(call.path_str("uid")?),
            "updateOrganization" => self.update_organization(call),
            "deleteOrganization" => self.delete_organization(call),
            "setOrganizationLimit" => self.set_organization_limit(call),

            "getUsers" => self.get_users(call),
            "createUser" => self.create_user(call),
            "updateUserPassword" => self.update_user_password(call),
            "whoAmI" => self.who_am_i(call),
            "updateUser" => self.update_user(call),
            "deleteUser" => self.delete_user(call),
            "setUserPassword" => self.set_user_password(call),
            "revokeUser" => self.revoke_user(call),

            "getFileSystemGroups" => render(self.fs_groups.values().collect::<Vec<_>>()),
            "createFileSystemGroup" => self.create_fs_group(call),
            "getFileSystemGroup" => self.get_fs_group(call),
            "updateFileSystemGroup" => self.update_fs_group(call),
            "deleteFileSystemGroup" => self.delete_fs_group(call),

            "getFileSystems" => self.get_file_systems(call),
            "createFileSystem" => self.create_file_system(call),
            "getFileSystem" => self.get_file_system(call),
            "updateFileSystem" => self.update_file_system(call),
            "deleteFileSystem" => self.delete_file_system(call),

            "getS3Buckets" => render(BucketList { buckets: self.buckets.values().collect() }),
            "createS3Bucket" => self.create_bucket(call),
            "destroyS3Bucket" => self.destroy_bucket(call),
            "getS3BucketPolicy" => self.get_bucket_policy(call),
            "setS3BucketPolicy" => self.set_bucket_policy(call),
            "setS3BucketQuota" => self.set_bucket_quota(call),

            "s3ListAllLifecycleRules" => self.list_lifecycle_rules(call),
            "s3CreateLifecycleRule" => self.create_lifecycle_rule(call),
            "s3DeleteAllLifecycleRules" => self.delete_all_lifecycle_rules(call),
            "s3DeleteLifecycleRule" => self.delete_lifecycle_rule(call),

            "createS3Policy" => self.create_policy(call),
            "getS3Policy" => self.get_policy(call),
            "deleteS3Policy" => self.delete_policy(call),
            "attachS3Policy" => self.attach_policy(call),
            "detachS3Policy" => self.detach_policy(call),

            "getContainers" => render(self.containers.values().collect::<Vec<_>>()),
            "addContainer" => self.add_container(call),
            "getSingleContainer" => self.get_container(call),
            "deactivateContainer" => self.deactivate_container(call),
            "removeContainer" => self.remove_container(call),
            "getProcesses" => render(self.processes.values().collect::<Vec<_>>()),

            other => {
                Err(HarnessError::backend_fault(format!("operation '{other}' is not simulated")))
            },
        }
    }

    /// The caller's organization, which must exist.
    fn caller_org(&self, call: &OperationCall) -> HarnessResult<&Organization> {
        let caller = call.caller()?;
        self.organizations.get(&caller.organization).ok_or_else(|| {
            HarnessError::backend_fault(format!(
                "{}: token organization '{}' does not exist",
                call.operation_id, caller.organization
            ))
        })
    }

    // Organizations

    fn organization_view<'a>(&self, org: &'a Organization) -> OrganizationView<'a> {
        let (total_allocated, ssd_allocated) = self
            .file_systems
            .values()
            .filter(|fs| fs.org_uid == org.uid)
            .fold((0u64, 0u64), |(total, ssd), fs| {
                (total.saturating_add(fs.total_budget), ssd.saturating_add(fs.ssd_budget))
            });
        OrganizationView { org, total_allocated, ssd_allocated }
    }

    fn organization_response(&self, uid: &str) -> HarnessResult<ApiResponse> {
        match self.organizations.get(uid) {
            Some(org) => render(self.organization_view(org)),
            None => Ok(not_found("organization", uid)),
        }
    }

    fn get_organizations(&self) -> HarnessResult<ApiResponse> {
        let views: Vec<_> =
            self.organizations.values().map(|org| self.organization_view(org)).collect();
        render(views)
    }

    fn create_organization(&mut self, call: &OperationCall) -> HarnessResult<ApiResponse> {
        let request: CreateOrganizationRequest = parse_body(call)?;
        if self.org_names.contains_key(&request.name) {
            return Ok(already_exists("organization", &request.name));
        }

        let org = Organization {
            uid: new_uid(),
            id: self.next_org_id,
            name: request.name,
            total_quota: request.total_quota,
            ssd_quota: request.ssd_quota,
        };
        self.next_org_id += 1;

        let admin = User::new(&request.username, &request.password, Role::OrgAdmin, &org);
        debug!(uid = %org.uid, name = %org.name, admin = %admin.username, "organization created");

        let uid = org.uid.clone();
        self.org_names.insert(org.name.clone(), uid.clone());
        self.users.insert(admin.uid.clone(), admin);
        self.organizations.insert(uid.clone(), org);
        self.organization_response(&uid)
    }

    fn update_organization(&mut self, call: &OperationCall) -> HarnessResult<ApiResponse> {
        let uid = call.path_str("uid")?;
        let request: RenameRequest = parse_body(call)?;

        let Some(org) = self.organizations.get_mut(uid) else {
            return Ok(not_found("organization", uid));
        };
        if self.org_names.get(&request.new_name).is_some_and(|owner| owner != uid) {
            return Ok(already_exists("organization", &request.new_name));
        }
        if self.org_names.remove(&org.name).is_none() {
            return Err(dangling("organization name index", &org.name));
        }

        self.org_names.insert(request.new_name.clone(), uid.to_owned());
        org.name = request.new_name;
        self.organization_response(uid)
    }

    fn delete_organization(&mut self, call: &OperationCall) -> HarnessResult<ApiResponse> {
        let uid = call.path_str("uid")?;
        let Some(name) = self.organizations.get(uid).map(|org| org.name.clone()) else {
            return Ok(not_found("organization", uid));
        };
        if self.org_names.remove(&name).is_none() {
            return Err(dangling("organization name index", &name));
        }

        self.organizations.remove(uid);
        self.file_systems.retain(|_, fs| fs.org_uid != uid);
        self.users.retain(|_, user| user.org_uid != uid);
        debug!(uid, name = %name, "organization deleted");
        Ok(ApiResponse::empty())
    }

    fn set_organization_limit(&mut self, call: &OperationCall) -> HarnessResult<ApiResponse> {
        let uid = call.path_str("uid")?;
        let request: SetOrganizationLimitRequest = parse_body(call)?;
        let Some(org) = self.organizations.get_mut(uid) else {
            return Ok(not_found("organization", uid));
        };
        if let Some(total) = request.total_quota {
            org.total_quota = Some(total);
        }
        if let Some(ssd) = request.ssd_quota {
            org.ssd_quota = Some(ssd);
        }
        self.organization_response(uid)
    }

    // Users

    fn has_user(&self, org_uid: &str, username: &str) -> bool {
        self.users.values().any(|user| user.org_uid == org_uid && user.username == username)
    }

    fn org_user_mut(&mut self, org_uid: &str, uid: &str) -> Option<&mut User> {
        self.users.get_mut(uid).filter(|user| user.org_uid == org_uid)
    }

    fn get_users(&self, call: &OperationCall) -> HarnessResult<ApiResponse> {
        let org = self.caller_org(call)?;
        render(self.users.values().filter(|user| user.org_uid == org.uid).collect::<Vec<_>>())
    }

    fn create_user(&mut self, call: &OperationCall) -> HarnessResult<ApiResponse> {
        let request: CreateUserRequest = parse_body(call)?;
        let org = self.caller_org(call)?;
        if self.has_user(&org.uid, &request.username) {
            return Ok(already_exists("user", &request.username));
        }

        let user = User::new(&request.username, &request.password, request.role, org);
        debug!(uid = %user.uid, username = %user.username, role = %user.role, "user created");
        let response = render(&user);
        self.users.insert(user.uid.clone(), user);
        response
    }

    fn update_user_password(&mut self, call: &OperationCall) -> HarnessResult<ApiResponse> {
        let request: UpdateUserPasswordRequest = parse_body(call)?;
        let caller = call.caller()?;
        let Some(user) = self.users.get_mut(&caller.subject) else {
            return Ok(ApiResponse::bad_request("caller is not a known user"));
        };
        if user.password != request.old_password {
            return Ok(ApiResponse::bad_request("old password does not match"));
        }
        user.password = request.new_password;
        Ok(ApiResponse::empty())
    }

    fn who_am_i(&self, call: &OperationCall) -> HarnessResult<ApiResponse> {
        let caller = call.caller()?;
        match self.users.get(&caller.subject) {
            Some(user) => render(user),
            None => Ok(ApiResponse::unauthorized()),
        }
    }

    fn update_user(&mut self, call: &OperationCall) -> HarnessResult<ApiResponse> {
        let uid = call.path_str("uid")?;
        let request: UpdateUserRequest = parse_body(call)?;
        let org_uid = self.caller_org(call)?.uid.clone();
        let Some(user) = self.org_user_mut(&org_uid, uid) else {
            return Ok(not_found("user", uid));
        };
        user.role = request.role;
        render(&*user)
    }

    fn delete_user(&mut self, call: &OperationCall) -> HarnessResult<ApiResponse> {
        let uid = call.path_str("uid")?;
        let org_uid = self.caller_org(call)?.uid.clone();
        if self.org_user_mut(&org_uid, uid).is_none() {
            return Ok(not_found("user", uid));
        }
        self.users.remove(uid);
        Ok(ApiResponse::empty())
    }

    fn set_user_password(&mut self, call: &OperationCall) -> HarnessResult<ApiResponse> {
        let uid = call.path_str("uid")?;
        let request: SetUserPasswordRequest = parse_body(call)?;
        let org_uid = self.caller_org(call)?.uid.clone();
        let Some(user) = self.org_user_mut(&org_uid, uid) else {
            return Ok(not_found("user", uid));
        };
        user.password = request.password;
        Ok(ApiResponse::empty())
    }

    fn revoke_user(&mut self, call: &OperationCall) -> HarnessResult<ApiResponse> {
        let uid = call.path_str("uid")?;
        let org_uid = self.caller_org(call)?.uid.clone();
        let Some(user) = self.org_user_mut(&org_uid, uid) else {
            return Ok(not_found("user", uid));
        };
        user.revoked = true;
        debug!(uid, "user credentials revoked");
        Ok(ApiResponse::empty())
    }

    // File-system groups

    fn create_fs_group(&mut self, call: &OperationCall) -> HarnessResult<ApiResponse> {
        let request: FileSystemGroupRequest = parse_body(call)?;
        if self.fs_groups.values().any(|group| group.name == request.name) {
            return Ok(already_exists("file system group", &request.name));
        }

        let group = FileSystemGroup {
            uid: new_uid(),
            id: format!("FSGroupId<{}>", self.next_group_id),
            name: request.name,
            target_ssd_retention: request.target_ssd_retention.unwrap_or(DEFAULT_RETENTION_SECS),
            start_demote: request.start_demote.unwrap_or(DEFAULT_START_DEMOTE_SECS),
        };
        self.next_group_id += 1;
        let response = render(&group);
        self.fs_groups.insert(group.uid.clone(), group);
        response
    }

    fn get_fs_group(&self, call: &OperationCall) -> HarnessResult<ApiResponse> {
        let uid = call.path_str("uid")?;
        match self.fs_groups.get(uid) {
            Some(group) => render(group),
            None => Ok(not_found("file system group", uid)),
        }
    }

    fn update_fs_group(&mut self, call: &OperationCall) -> HarnessResult<ApiResponse> {
        let uid = call.path_str("uid")?;
        let request: FileSystemGroupRequest = parse_body(call)?;
        if !self.fs_groups.contains_key(uid) {
            return Ok(not_found("file system group", uid));
        }
        if self.fs_groups.values().any(|group| group.name == request.name && group.uid != uid) {
            return Ok(already_exists("file system group", &request.name));
        }

        let Some(group) = self.fs_groups.get_mut(uid) else {
            return Ok(not_found("file system group", uid));
        };
        group.name = request.name;
        if let Some(retention) = request.target_ssd_retention {
            group.target_ssd_retention = retention;
        }
        if let Some(demote) = request.start_demote {
            group.start_demote = demote;
        }
        render(&*group)
    }

    fn delete_fs_group(&mut self, call: &OperationCall) -> HarnessResult<ApiResponse> {
        let uid = call.path_str("uid")?;
        match self.fs_groups.remove(uid) {
            Some(_) => Ok(ApiResponse::empty()),
            None => Ok(not_found("file system group", uid)),
        }
    }

    // File systems

    fn get_file_systems(&self, call: &OperationCall) -> HarnessResult<ApiResponse> {
        let org = self.caller_org(call)?;
        render(self.file_systems.values().filter(|fs| fs.org_uid == org.uid).collect::<Vec<_>>())
    }

    fn create_file_system(&mut self, call: &OperationCall) -> HarnessResult<ApiResponse> {
        let request: CreateFileSystemRequest = parse_body(call)?;
        let org_uid = self.caller_org(call)?.uid.clone();
        if self.file_systems.values().any(|fs| fs.org_uid == org_uid && fs.name == request.name) {
            return Ok(already_exists("file system", &request.name));
        }
        let ssd_budget = request.ssd_capacity.unwrap_or(request.total_capacity);
        if ssd_budget > request.total_capacity {
            return Ok(ApiResponse::bad_request("ssd_capacity exceeds total_capacity"));
        }

        let fs = FileSystem {
            uid: new_uid(),
            id: format!("Filesystem<{}>", self.next_fs_id),
            name: request.name,
            group_name: request.group_name,
            total_budget: request.total_capacity,
            ssd_budget,
            auth_required: request.auth_required,
            is_encrypted: request.encrypted,
            is_ready: true,
            status: "READY".to_owned(),
            org_uid,
        };
        self.next_fs_id += 1;
        debug!(uid = %fs.uid, name = %fs.name, org = %fs.org_uid, "file system created");
        let response = render(&fs);
        self.file_systems.insert(fs.uid.clone(), fs);
        response
    }

    fn org_file_system_mut(
        &mut self,
        call: &OperationCall,
    ) -> HarnessResult<Option<&mut FileSystem>> {
        let uid = call.path_str("uid")?;
        let org_uid = self.caller_org(call)?.uid.clone();
        Ok(self.file_systems.get_mut(uid).filter(|fs| fs.org_uid == org_uid))
    }

    fn get_file_system(&mut self, call: &OperationCall) -> HarnessResult<ApiResponse> {
        match self.org_file_system_mut(call)? {
            Some(fs) => render(&*fs),
            None => Ok(not_found("file system", call.path_str("uid")?)),
        }
    }

    fn update_file_system(&mut self, call: &OperationCall) -> HarnessResult<ApiResponse> {
        let request: UpdateFileSystemRequest = parse_body(call)?;
        let uid = call.path_str("uid")?;
        let org_uid = self.caller_org(call)?.uid.clone();

        if let Some(new_name) = &request.new_name
            && self
                .file_systems
                .values()
                .any(|fs| fs.org_uid == org_uid && fs.name == *new_name && fs.uid != uid)
        {
            return Ok(already_exists("file system", new_name));
        }
        let Some(fs) = self.org_file_system_mut(call)? else {
            return Ok(not_found("file system", uid));
        };

        let total = request.total_capacity.unwrap_or(fs.total_budget);
        let ssd = request.ssd_capacity.unwrap_or(fs.ssd_budget);
        if ssd > total {
            return Ok(ApiResponse::bad_request("ssd_capacity exceeds total_capacity"));
        }
        fs.total_budget = total;
        fs.ssd_budget = ssd;
        if let Some(name) = request.new_name {
            fs.name = name;
        }
        if let Some(auth_required) = request.auth_required {
            fs.auth_required = auth_required;
        }
        render(&*fs)
    }

    fn delete_file_system(&mut self, call: &OperationCall) -> HarnessResult<ApiResponse> {
        let uid = call.path_str("uid")?;
        if self.org_file_system_mut(call)?.is_none() {
            return Ok(not_found("file system", uid));
        }
        self.file_systems.remove(uid);
        debug!(uid, "file system deleted");
        Ok(ApiResponse::empty())
    }

    // S3 buckets

    fn create_bucket(&mut self, call: &OperationCall) -> HarnessResult<ApiResponse> {
        let request: CreateS3BucketRequest = parse_body(call)?;
        if self.buckets.contains_key(&request.bucket_name) {
            return Ok(already_exists("bucket", &request.bucket_name));
        }
        let hard_limit_bytes = match request.hard_quota.as_deref() {
            Some(quota) => match parse_byte_size(quota) {
                Some(bytes) => bytes,
                None => return Ok(invalid_quota(quota)),
            },
            None => 0,
        };

        let bucket = Bucket {
            path: request.bucket_name.clone(),
            name: request.bucket_name,
            hard_limit_bytes,
            used_bytes: 0,
            policy: request.policy.unwrap_or_else(|| "none".to_owned()),
        };
        let response = render(&bucket);
        self.buckets.insert(bucket.name.clone(), bucket);
        response
    }

    fn destroy_bucket(&mut self, call: &OperationCall) -> HarnessResult<ApiResponse> {
        let name = call.path_str("bucket")?;
        if self.buckets.remove(name).is_none() {
            return Ok(not_found("bucket", name));
        }
        self.lifecycle_rules.remove(name);
        Ok(ApiResponse::empty())
    }

    fn get_bucket_policy(&self, call: &OperationCall) -> HarnessResult<ApiResponse> {
        let name = call.path_str("bucket")?;
        match self.buckets.get(name) {
            Some(bucket) => render(json!({ "policy": bucket.policy })),
            None => Ok(not_found("bucket", name)),
        }
    }

    fn set_bucket_policy(&mut self, call: &OperationCall) -> HarnessResult<ApiResponse> {
        let name = call.path_str("bucket")?;
        let request: SetS3BucketPolicyRequest = parse_body(call)?;
        let Some(bucket) = self.buckets.get_mut(name) else {
            return Ok(not_found("bucket", name));
        };
        bucket.policy = request.bucket_policy;
        Ok(ApiResponse::empty())
    }

    fn set_bucket_quota(&mut self, call: &OperationCall) -> HarnessResult<ApiResponse> {
        let name = call.path_str("bucket")?;
        let request: SetS3BucketQuotaRequest = parse_body(call)?;
        let Some(bucket) = self.buckets.get_mut(name) else {
            return Ok(not_found("bucket", name));
        };
        let Some(bytes) = parse_byte_size(&request.hard_quota) else {
            return Ok(invalid_quota(&request.hard_quota));
        };
        bucket.hard_limit_bytes = bytes;
        Ok(ApiResponse::empty())
    }

    // Lifecycle rules

    fn list_lifecycle_rules(&self, call: &OperationCall) -> HarnessResult<ApiResponse> {
        let name = call.path_str("bucket")?;
        if !self.buckets.contains_key(name) {
            return Ok(not_found("bucket", name));
        }
        let rules = self.lifecycle_rules.get(name).map_or(&[][..], Vec::as_slice);
        render(LifecycleRules { bucket: name, rules })
    }

    fn create_lifecycle_rule(&mut self, call: &OperationCall) -> HarnessResult<ApiResponse> {
        let name = call.path_str("bucket")?;
        let request: CreateLifecycleRuleRequest = parse_body(call)?;
        if !self.buckets.contains_key(name) {
            return Ok(not_found("bucket", name));
        }
        let rule = LifecycleRule {
            id: new_uid(),
            enabled: true,
            expiry_days: request.expiry_days,
            prefix: request.prefix,
        };
        let response = render(&rule);
        self.lifecycle_rules.entry(name.to_owned()).or_default().push(rule);
        response
    }

    fn delete_all_lifecycle_rules(&mut self, call: &OperationCall) -> HarnessResult<ApiResponse> {
        let name = call.path_str("bucket")?;
        if !self.buckets.contains_key(name) {
            return Ok(not_found("bucket", name));
        }
        self.lifecycle_rules.remove(name);
        Ok(ApiResponse::empty())
    }

    fn delete_lifecycle_rule(&mut self, call: &OperationCall) -> HarnessResult<ApiResponse> {
        let name = call.path_str("bucket")?;
        let rule_id = call.path_str("rule")?;
        if !self.buckets.contains_key(name) {
            return Ok(not_found("bucket", name));
        }
        let rules = self.lifecycle_rules.entry(name.to_owned()).or_default();
        let before = rules.len();
        rules.retain(|rule| rule.id != rule_id);
        if rules.len() == before {
            return Ok(not_found("lifecycle rule", rule_id));
        }
        Ok(ApiResponse::empty())
    }

    // IAM policies

    fn create_policy(&mut self, call: &OperationCall) -> HarnessResult<ApiResponse> {
        let request: CreateS3PolicyRequest = parse_body(call)?;
        if self.policies.contains_key(&request.policy_name) {
            return Ok(already_exists("policy", &request.policy_name));
        }
        let response = render(policy_view(&request.policy_name, &request.policy_file_content));
        self.policies.insert(request.policy_name, request.policy_file_content);
        response
    }

    fn get_policy(&self, call: &OperationCall) -> HarnessResult<ApiResponse> {
        let name = call.path_str("policy")?;
        match self.policies.get(name) {
            Some(content) => render(policy_view(name, content)),
            None => Ok(not_found("policy", name)),
        }
    }

    fn delete_policy(&mut self, call: &OperationCall) -> HarnessResult<ApiResponse> {
        let name = call.path_str("policy")?;
        if self.policies.remove(name).is_none() {
            return Ok(not_found("policy", name));
        }
        self.policy_attachments.retain(|_, attached| attached != name);
        Ok(ApiResponse::empty())
    }

    fn attach_policy(&mut self, call: &OperationCall) -> HarnessResult<ApiResponse> {
        let request: AttachS3PolicyRequest = parse_body(call)?;
        if !self.policies.contains_key(&request.policy_name) {
            return Ok(not_found("policy", &request.policy_name));
        }
        let org_uid = &self.caller_org(call)?.uid;
        if !self.has_user(org_uid, &request.user_name) {
            return Ok(not_found("user", &request.user_name));
        }
        self.policy_attachments.insert(request.user_name, request.policy_name);
        Ok(ApiResponse::empty())
    }

    fn detach_policy(&mut self, call: &OperationCall) -> HarnessResult<ApiResponse> {
        let request: DetachS3PolicyRequest = parse_body(call)?;
        self.policy_attachments.remove(&request.user_name);
        Ok(ApiResponse::empty())
    }

    // Containers

    fn add_container(&mut self, call: &OperationCall) -> HarnessResult<ApiResponse> {
        let request: AddContainerRequest = parse_body(call)?;
        if self.containers.values().any(|container| container.hostname == request.container_name) {
            return Ok(already_exists("container", &request.container_name));
        }

        let container = Container {
            uid: new_uid(),
            hostname: request.container_name,
            ips: vec![request.ip],
            status: RunState::Up,
            mode: "CLIENT".to_owned(),
            cores: CONTAINER_CORES,
        };
        // One management process plus one frontend process per core.
        for index in 0..=container.cores {
            let role = if index == 0 { "MANAGEMENT" } else { "FRONTEND" };
            let process = Process {
                uid: new_uid(),
                hostname: container.hostname.clone(),
                status: RunState::Up,
                mode: container.mode.clone(),
                roles: vec![role.to_owned()],
                container_uid: container.uid.clone(),
            };
            self.processes.insert(process.uid.clone(), process);
        }
        debug!(uid = %container.uid, hostname = %container.hostname, "container added");

        let response = render(&container);
        self.containers.insert(container.uid.clone(), container);
        response
    }

    fn get_container(&self, call: &OperationCall) -> HarnessResult<ApiResponse> {
        let uid = call.path_str("uid")?;
        match self.containers.get(uid) {
            Some(container) => render(container),
            None => Ok(not_found("container", uid)),
        }
    }

    fn deactivate_container(&mut self, call: &OperationCall) -> HarnessResult<ApiResponse> {
        let uid = call.path_str("uid")?;
        let Some(container) = self.containers.get_mut(uid) else {
            return Ok(not_found("container", uid));
        };
        container.status = RunState::Down;
        for process in self.processes.values_mut().filter(|process| process.container_uid == uid) {
            process.status = RunState::Down;
        }
        Ok(ApiResponse::empty())
    }

    fn remove_container(&mut self, call: &OperationCall) -> HarnessResult<ApiResponse> {
        let uid = call.path_str("uid")?;
        if self.containers.remove(uid).is_none() {
            return Ok(not_found("container", uid));
        }
        self.processes.retain(|_, process| process.container_uid != uid);
        Ok(ApiResponse::empty())
    }
}

fn cluster_status() -> HarnessResult<ApiResponse> {
    render(json!({
        "name": "vendorsim",
        "status": "OK",
        "guid": CLUSTER_GUID,
        "io_status": "STARTED",
        "release": "4.2.0",
    }))
}

fn policy_view(name: &str, content: &Value) -> Value {
    json!({ "policy": { "name": name, "content": content } })
}

fn new_uid() -> String {
    Uuid::new_v4().to_string()
}

fn not_found(kind: &str, key: &str) -> ApiResponse {
    ApiResponse::not_found(format!("{kind} '{key}' not found"))
}

fn already_exists(kind: &str, name: &str) -> ApiResponse {
    ApiResponse::bad_request(format!("{kind} '{name}' already exists"))
}

fn invalid_quota(quota: &str) -> ApiResponse {
    ApiResponse::bad_request(format!("invalid hard_quota '{quota}'"))
}

fn dangling(index: &str, key: &str) -> HarnessError {
    HarnessError::backend_fault(format!("{index} entry '{key}' points at nothing"))
}

fn parse_body<T: DeserializeOwned>(call: &OperationCall) -> HarnessResult<T> {
    let body = call.body.clone().unwrap_or(Value::Null);
    serde_json::from_value(body).map_err(|e| {
        HarnessError::backend_fault(format!(
            "{}: body does not match the contract: {e}",
            call.operation_id
        ))
    })
}

fn render<T: Serialize>(data: T) -> HarnessResult<ApiResponse> {
    serde_json::to_value(data)
        .map(ApiResponse::ok)
        .map_err(|e| HarnessError::backend_fault(format!("cannot serialize response: {e}")))
}

/// Parses a decimal byte size such as `10GB` into bytes.
///
/// Units are powers of 1000. Returns `None` for a missing or unknown unit
/// and on overflow.
fn parse_byte_size(size: &str) -> Option<u64> {
    let split = size.find(|c: char| !c.is_ascii_digit())?;
    let (digits, unit) = size.split_at(split);
    let value: u64 = digits.parse().ok()?;
    let multiplier: u64 = match unit {
        "B" => 1,
        "KB" => 1_000,
        "MB" => 1_000_000,
        "GB" => 1_000_000_000,
        "TB" => 1_000_000_000_000,
        "PB" => 1_000_000_000_000_000,
        _ => return None,
    };
    value.checked_mul(multiplier)
}

/// In-memory resource backend.
#[derive(Debug)]
pub struct SimulatedBackend {
    tokens: Arc<TokenService>,
    model: Mutex<Model>,
}

impl SimulatedBackend {
    /// Creates a backend holding only the root organization and cluster
    /// administrator. `login` issues tokens with `tokens`.
    #[must_use]
    pub fn new(tokens: Arc<TokenService>) -> Self {
        Self { tokens, model: Mutex::new(Model::seeded()) }
    }

    /// Current number of resources of each kind.
    #[must_use]
    pub fn resource_counts(&self) -> ResourceCounts {
        self.model.lock().counts()
    }

    fn login(&self, call: &OperationCall) -> HarnessResult<ApiResponse> {
        let request: LoginRequest = parse_body(call)?;
        let Some(grant) = self.model.lock().authenticate(&request)? else {
            debug!(username = %request.username, "login rejected");
            return Ok(ApiResponse::unauthorized());
        };

        let token = self
            .tokens
            .issue(&grant.subject, &grant.organization, grant.role.scopes())
            .map_err(|e| HarnessError::backend_fault(format!("cannot issue token: {e}")))?;
        Ok(ApiResponse::ok(login_tokens(token)))
    }
}

#[async_trait]
impl VendorBackend for SimulatedBackend {
    async fn handle(&self, call: &OperationCall) -> HarnessResult<ApiResponse> {
        match call.operation_id.as_str() {
            "login" => self.login(call),
            _ => self.model.lock().dispatch(call),
        }
    }

    fn mode(&self) -> BackendMode {
        BackendMode::Simulated
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use axum::http::StatusCode;
    use rstest::rstest;
    use tokio::task::JoinSet;
    use vendorsim_authn::AuthContext;

    use super::*;
    use crate::contract::ApiContract;

    struct Sim {
        backend: Arc<SimulatedBackend>,
        tokens: Arc<TokenService>,
        contract: Arc<ApiContract>,
    }

    impl Sim {
        fn new() -> Self {
            let tokens = Arc::new(TokenService::builder().build());
            Self {
                backend: Arc::new(SimulatedBackend::new(Arc::clone(&tokens))),
                tokens,
                contract: Arc::new(ApiContract::bundled().unwrap()),
            }
        }

        /// Calls the backend and checks the response against the contract.
        async fn call(&self, call: OperationCall) -> ApiResponse {
            let response = self.backend.handle(&call).await.unwrap();
            self.contract
                .validate_response(&call.operation_id, response.status.as_u16(), &response.body)
                .unwrap_or_else(|e| panic!("{}: {e}", call.operation_id));
            response
        }

        async fn login(&self, username: &str, password: &str, org: Option<&str>) -> ApiResponse {
            let mut body = json!({ "username": username, "password": password });
            if let Some(org) = org {
                body["org"] = json!(org);
            }
            self.call(OperationCall::new("login").with_body(body)).await
        }

        async fn session(&self, username: &str, password: &str, org: Option<&str>) -> AuthContext {
            let response = self.login(username, password, org).await;
            assert_eq!(response.status, StatusCode::OK, "{}", response.body);
            let token = response.body["data"]["access_token"].as_str().unwrap();
            let claims = self.tokens.verify(token).unwrap();
            AuthContext { subject: claims.sub, organization: claims.org, permissions: claims.perm }
        }

        async fn admin(&self) -> AuthContext {
            self.session(ADMIN_USERNAME, ADMIN_PASSWORD, None).await
        }
    }

    fn op(operation: &str, auth: &AuthContext) -> OperationCall {
        OperationCall::new(operation).with_auth(auth.clone())
    }

    async fn create_org(sim: &Sim, admin: &AuthContext, name: &str) -> String {
        let body = json!({
            "name": name,
            "username": format!("{name}-admin"),
            "password": "secret",
            "total_quota": 5000,
        });
        let response = sim.call(op("createOrganization", admin).with_body(body)).await;
        assert_eq!(response.status, StatusCode::OK);
        response.body["data"]["uid"].as_str().unwrap().to_owned()
    }

    async fn create_fs(sim: &Sim, auth: &AuthContext, name: &str) -> ApiResponse {
        let body = json!({ "name": name, "group_name": "default", "total_capacity": 1000 });
        sim.call(op("createFileSystem", auth).with_body(body)).await
    }

    #[tokio::test]
    async fn test_admin_login_defaults_to_root() {
        let sim = Sim::new();
        let admin = sim.admin().await;
        assert_eq!(admin.organization, ROOT_ORG_UID);
        assert_eq!(admin.permissions, Role::ClusterAdmin.scopes());

        let response = sim.login(ADMIN_USERNAME, ADMIN_PASSWORD, None).await;
        let data = &response.body["data"];
        assert_eq!(data["token_type"], "Bearer");
        assert_eq!(data["expires_in"], 3000);
        assert_eq!(data["password_change_required"], false);
    }

    #[rstest]
    #[case::wrong_password(ADMIN_USERNAME, "nope", None)]
    #[case::unknown_user("ghost", ADMIN_PASSWORD, None)]
    #[case::unknown_org(ADMIN_USERNAME, ADMIN_PASSWORD, Some("Elsewhere"))]
    #[tokio::test]
    async fn test_login_rejected(
        #[case] username: &str,
        #[case] password: &str,
        #[case] org: Option<&str>,
    ) {
        let sim = Sim::new();
        let response = sim.login(username, password, org).await;
        assert_eq!(response.status, StatusCode::UNAUTHORIZED);
        assert_eq!(response.body, json!({ "message": "unauthorized" }));
    }

    #[tokio::test]
    async fn test_organization_lifecycle() {
        let sim = Sim::new();
        let admin = sim.admin().await;

        let multiple = sim.call(op("getMultipleOrgExist", &admin)).await;
        assert_eq!(multiple.body["data"], false);

        let uid = create_org(&sim, &admin, "acme").await;
        let body = json!({ "name": "acme", "username": "x", "password": "y" });
        let duplicate = sim.call(op("createOrganization", &admin).with_body(body)).await;
        assert_eq!(duplicate.status, StatusCode::BAD_REQUEST);

        let listed = sim.call(op("getOrganizations", &admin)).await;
        assert_eq!(listed.body["data"].as_array().unwrap().len(), 2);
        let multiple = sim.call(op("getMultipleOrgExist", &admin)).await;
        assert_eq!(multiple.body["data"], true);

        let org_op = |operation: &str| op(operation, &admin).with_path_param("uid", uid.clone());
        let renamed =
            sim.call(org_op("updateOrganization").with_body(json!({ "new_name": "acme-2" }))).await;
        assert_eq!(renamed.body["data"]["name"], "acme-2");

        let clash =
            sim.call(org_op("updateOrganization").with_body(json!({ "new_name": "Root" }))).await;
        assert_eq!(clash.status, StatusCode::BAD_REQUEST);

        let limited =
            sim.call(org_op("setOrganizationLimit").with_body(json!({ "ssd_quota": 10 }))).await;
        assert_eq!(limited.body["data"]["total_quota"], 5000);
        assert_eq!(limited.body["data"]["ssd_quota"], 10);

        let get = org_op("getOrganization");
        assert_eq!(sim.call(get.clone()).await.status, StatusCode::OK);

        let delete = org_op("deleteOrganization");
        assert_eq!(sim.call(delete.clone()).await.status, StatusCode::OK);
        assert_eq!(sim.call(get).await.status, StatusCode::NOT_FOUND);
        assert_eq!(sim.call(delete).await.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_org_admin_scoping_and_cascade() {
        let sim = Sim::new();
        let admin = sim.admin().await;
        let org_uid = create_org(&sim, &admin, "acme").await;

        let org_admin = sim.session("acme-admin", "secret", Some("acme")).await;
        assert_eq!(org_admin.organization, org_uid);
        assert_eq!(org_admin.permissions, Role::OrgAdmin.scopes());

        let created = create_fs(&sim, &org_admin, "data").await;
        assert_eq!(created.status, StatusCode::OK);
        let fs_uid = created.body["data"]["uid"].as_str().unwrap().to_owned();

        // Same name is free in another organization.
        assert_eq!(create_fs(&sim, &admin, "data").await.status, StatusCode::OK);

        // Root's admin cannot see acme's file system.
        let cross =
            sim.call(op("getFileSystem", &admin).with_path_param("uid", fs_uid.clone())).await;
        assert_eq!(cross.status, StatusCode::NOT_FOUND);

        let org =
            sim.call(op("getOrganization", &admin).with_path_param("uid", org_uid.clone())).await;
        assert_eq!(org.body["data"]["total_allocated"], 1000);

        let before = sim.backend.resource_counts();
        sim.call(op("deleteOrganization", &admin).with_path_param("uid", org_uid)).await;
        let after = sim.backend.resource_counts();
        assert_eq!(after.file_systems, before.file_systems - 1);
        assert_eq!(after.users, before.users - 1);

        let relogin = sim.login("acme-admin", "secret", Some("acme")).await;
        assert_eq!(relogin.status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_file_system_create_get_delete() {
        let sim = Sim::new();
        let admin = sim.admin().await;

        let created = create_fs(&sim, &admin, "fs1").await;
        let data = &created.body["data"];
        assert_eq!(data["name"], "fs1");
        assert_eq!(data["total_budget"], 1000);
        assert_eq!(data["ssd_budget"], 1000);
        assert!(data["id"].as_str().unwrap().starts_with("Filesystem<"));
        let uid = data["uid"].as_str().unwrap().to_owned();

        let get = op("getFileSystem", &admin).with_path_param("uid", uid.clone());
        assert_eq!(sim.call(get.clone()).await.body["data"]["uid"], uid.as_str());

        assert_eq!(create_fs(&sim, &admin, "fs1").await.status, StatusCode::BAD_REQUEST);

        let listed = sim.call(op("getFileSystems", &admin)).await;
        assert_eq!(listed.body["data"].as_array().unwrap().len(), 1);

        let delete = op("deleteFileSystem", &admin).with_path_param("uid", uid);
        assert_eq!(sim.call(delete.clone()).await.status, StatusCode::OK);
        assert_eq!(sim.call(get).await.status, StatusCode::NOT_FOUND);
        assert_eq!(sim.call(delete).await.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_file_system_update() {
        let sim = Sim::new();
        let admin = sim.admin().await;
        create_fs(&sim, &admin, "taken").await;
        let uid =
            create_fs(&sim, &admin, "fs").await.body["data"]["uid"].as_str().unwrap().to_owned();

        let update = |body: Value| {
            op("updateFileSystem", &admin).with_path_param("uid", uid.clone()).with_body(body)
        };

        let renamed =
            sim.call(update(json!({ "new_name": "fs-renamed", "auth_required": true }))).await;
        assert_eq!(renamed.body["data"]["name"], "fs-renamed");
        assert_eq!(renamed.body["data"]["auth_required"], true);

        let clash = sim.call(update(json!({ "new_name": "taken" }))).await;
        assert_eq!(clash.status, StatusCode::BAD_REQUEST);
        let oversized = sim.call(update(json!({ "ssd_capacity": 5000 }))).await;
        assert_eq!(oversized.status, StatusCode::BAD_REQUEST);

        let grown = sim.call(update(json!({ "total_capacity": 9000, "ssd_capacity": 5000 }))).await;
        assert_eq!(grown.body["data"]["total_budget"], 9000);
        assert_eq!(grown.body["data"]["ssd_budget"], 5000);
    }

    #[tokio::test]
    async fn test_user_management() {
        let sim = Sim::new();
        let admin = sim.admin().await;

        let create = || {
            op("createUser", &admin)
                .with_body(json!({ "username": "bob", "password": "pw", "role": "Regular" }))
        };
        let created = sim.call(create()).await;
        assert_eq!(created.body["data"]["role"], "Regular");
        assert_eq!(created.body["data"]["org_id"], 0);
        assert!(created.body["data"].get("password").is_none());
        let uid = created.body["data"]["uid"].as_str().unwrap().to_owned();
        assert_eq!(sim.call(create()).await.status, StatusCode::BAD_REQUEST);

        let users = sim.call(op("getUsers", &admin)).await;
        assert_eq!(users.body["data"].as_array().unwrap().len(), 2);

        let user_op = |operation: &str| op(operation, &admin).with_path_param("uid", uid.clone());
        let promoted = sim.call(user_op("updateUser").with_body(json!({ "role": "S3" }))).await;
        assert_eq!(promoted.body["data"]["role"], "S3");

        sim.call(user_op("setUserPassword").with_body(json!({ "password": "pw2" }))).await;
        assert_eq!(sim.login("bob", "pw", None).await.status, StatusCode::UNAUTHORIZED);
        let bob = sim.session("bob", "pw2", None).await;
        assert_eq!(bob.permissions, Role::S3.scopes());

        let whoami = sim.call(op("whoAmI", &bob)).await;
        assert_eq!(whoami.body["data"]["username"], "bob");

        let delete = user_op("deleteUser");
        assert_eq!(sim.call(delete.clone()).await.status, StatusCode::OK);
        assert_eq!(sim.call(delete).await.status, StatusCode::NOT_FOUND);
        assert_eq!(sim.call(op("whoAmI", &bob)).await.status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_update_own_password() {
        let sim = Sim::new();
        let admin = sim.admin().await;
        let change = |old: &str| {
            op("updateUserPassword", &admin)
                .with_body(json!({ "old_password": old, "new_password": "rotated" }))
        };

        assert_eq!(sim.call(change("wrong")).await.status, StatusCode::BAD_REQUEST);
        assert_eq!(sim.call(change(ADMIN_PASSWORD)).await.status, StatusCode::OK);
        let stale = sim.login(ADMIN_USERNAME, ADMIN_PASSWORD, None).await;
        assert_eq!(stale.status, StatusCode::UNAUTHORIZED);
        assert_eq!(sim.login(ADMIN_USERNAME, "rotated", None).await.status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_revoked_user_is_locked_out_until_next_login() {
        let sim = Sim::new();
        let admin = sim.admin().await;
        let body = json!({ "username": "eve", "password": "pw", "role": "Regular" });
        let created = sim.call(op("createUser", &admin).with_body(body)).await;
        let uid = created.body["data"]["uid"].as_str().unwrap().to_owned();
        let eve = sim.session("eve", "pw", None).await;

        sim.call(op("revokeUser", &admin).with_path_param("uid", uid)).await;
        assert_eq!(sim.call(op("getFileSystems", &eve)).await.status, StatusCode::UNAUTHORIZED);

        let eve = sim.session("eve", "pw", None).await;
        assert_eq!(sim.call(op("getFileSystems", &eve)).await.status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_file_system_groups() {
        let sim = Sim::new();
        let admin = sim.admin().await;

        let created =
            sim.call(op("createFileSystemGroup", &admin).with_body(json!({ "name": "g1" }))).await;
        let data = &created.body["data"];
        assert_eq!(data["id"], "FSGroupId<0>");
        assert_eq!(data["target_ssd_retention"], DEFAULT_RETENTION_SECS);
        let uid = data["uid"].as_str().unwrap().to_owned();

        sim.call(op("createFileSystemGroup", &admin).with_body(json!({ "name": "g2" }))).await;
        let duplicate =
            sim.call(op("createFileSystemGroup", &admin).with_body(json!({ "name": "g1" }))).await;
        assert_eq!(duplicate.status, StatusCode::BAD_REQUEST);

        let update = |name: &str| {
            op("updateFileSystemGroup", &admin)
                .with_path_param("uid", uid.clone())
                .with_body(json!({ "new_name": name, "start_demote": 60 }))
        };
        assert_eq!(sim.call(update("g2")).await.status, StatusCode::BAD_REQUEST);
        let renamed = sim.call(update("g1-renamed")).await;
        assert_eq!(renamed.body["data"]["name"], "g1-renamed");
        assert_eq!(renamed.body["data"]["start_demote"], 60);

        let groups = sim.call(op("getFileSystemGroups", &admin)).await;
        assert_eq!(groups.body["data"].as_array().unwrap().len(), 2);

        let get = op("getFileSystemGroup", &admin).with_path_param("uid", uid.clone());
        assert_eq!(sim.call(get.clone()).await.status, StatusCode::OK);
        sim.call(op("deleteFileSystemGroup", &admin).with_path_param("uid", uid)).await;
        assert_eq!(sim.call(get).await.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_buckets_policy_and_quota() {
        let sim = Sim::new();
        let admin = sim.admin().await;
        let bucket = |operation: &str| op(operation, &admin).with_path_param("bucket", "logs");

        let body = json!({ "bucket_name": "logs", "hard_quota": "10GB" });
        let created = sim.call(op("createS3Bucket", &admin).with_body(body)).await;
        assert_eq!(created.body["data"]["hard_limit_bytes"], 10_000_000_000u64);
        assert_eq!(created.body["data"]["used_bytes"], 0);

        let body = json!({ "bucket_name": "logs" });
        let duplicate = sim.call(op("createS3Bucket", &admin).with_body(body)).await;
        assert_eq!(duplicate.status, StatusCode::BAD_REQUEST);

        assert_eq!(sim.call(bucket("getS3BucketPolicy")).await.body["data"]["policy"], "none");
        let policy = json!({ "bucket_policy": "download" });
        sim.call(bucket("setS3BucketPolicy").with_body(policy)).await;
        assert_eq!(sim.call(bucket("getS3BucketPolicy")).await.body["data"]["policy"], "download");

        sim.call(bucket("setS3BucketQuota").with_body(json!({ "hard_quota": "2MB" }))).await;
        let listed = sim.call(op("getS3Buckets", &admin)).await;
        assert_eq!(listed.body["data"]["buckets"][0]["hard_limit_bytes"], 2_000_000);

        assert_eq!(sim.call(bucket("destroyS3Bucket")).await.status, StatusCode::OK);
        assert_eq!(sim.call(bucket("getS3BucketPolicy")).await.status, StatusCode::NOT_FOUND);
        assert_eq!(sim.call(bucket("destroyS3Bucket")).await.status, StatusCode::NOT_FOUND);
    }

    #[rstest]
    #[case("0B", Some(0))]
    #[case("512B", Some(512))]
    #[case("3KB", Some(3_000))]
    #[case("10GB", Some(10_000_000_000))]
    #[case("1PB", Some(1_000_000_000_000_000))]
    #[case("10", None)]
    #[case("GB", None)]
    #[case("10GiB", None)]
    #[case("99999999PB", None)]
    fn test_parse_byte_size(#[case] input: &str, #[case] expected: Option<u64>) {
        assert_eq!(parse_byte_size(input), expected);
    }

    #[tokio::test]
    async fn test_lifecycle_rules() {
        let sim = Sim::new();
        let admin = sim.admin().await;
        let bucket = |operation: &str| op(operation, &admin).with_path_param("bucket", "logs");

        assert_eq!(sim.call(bucket("s3ListAllLifecycleRules")).await.status, StatusCode::NOT_FOUND);
        sim.call(op("createS3Bucket", &admin).with_body(json!({ "bucket_name": "logs" }))).await;

        let rule = json!({ "expiry_days": "30", "prefix": "tmp/" });
        let first = sim.call(bucket("s3CreateLifecycleRule").with_body(rule)).await;
        let first_id = first.body["data"]["id"].as_str().unwrap().to_owned();
        sim.call(bucket("s3CreateLifecycleRule").with_body(json!({ "expiry_days": "90" }))).await;

        let listed = sim.call(bucket("s3ListAllLifecycleRules")).await;
        assert_eq!(listed.body["data"]["bucket"], "logs");
        assert_eq!(listed.body["data"]["rules"].as_array().unwrap().len(), 2);

        let delete_one = bucket("s3DeleteLifecycleRule").with_path_param("rule", first_id);
        assert_eq!(sim.call(delete_one.clone()).await.status, StatusCode::OK);
        assert_eq!(sim.call(delete_one).await.status, StatusCode::NOT_FOUND);

        sim.call(bucket("s3DeleteAllLifecycleRules")).await;
        let listed = sim.call(bucket("s3ListAllLifecycleRules")).await;
        assert!(listed.body["data"]["rules"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_iam_policies() {
        let sim = Sim::new();
        let admin = sim.admin().await;
        let content = json!({ "Version": "2012-10-17", "Statement": [{ "Effect": "Allow" }] });
        let get = op("getS3Policy", &admin).with_path_param("policy", "readers");

        assert_eq!(sim.call(get.clone()).await.status, StatusCode::NOT_FOUND);
        let attach = op("attachS3Policy", &admin)
            .with_body(json!({ "policy_name": "readers", "user_name": "bob" }));
        assert_eq!(sim.call(attach.clone()).await.status, StatusCode::NOT_FOUND);

        let create = op("createS3Policy", &admin)
            .with_body(json!({ "policy_name": "readers", "policy_file_content": content }));
        let created = sim.call(create.clone()).await;
        assert_eq!(created.body["data"]["policy"]["name"], "readers");
        assert_eq!(sim.call(create).await.status, StatusCode::BAD_REQUEST);

        assert_eq!(sim.call(get.clone()).await.body["data"]["policy"]["content"], content);
        assert_eq!(sim.call(attach.clone()).await.status, StatusCode::NOT_FOUND);
        let bob = op("createUser", &admin)
            .with_body(json!({ "username": "bob", "password": "bobPassword", "role": "S3" }));
        assert_eq!(sim.call(bob).await.status, StatusCode::OK);
        assert_eq!(sim.call(attach).await.status, StatusCode::OK);
        let detach = op("detachS3Policy", &admin).with_body(json!({ "user_name": "bob" }));
        assert_eq!(sim.call(detach).await.status, StatusCode::OK);

        let delete = op("deleteS3Policy", &admin).with_path_param("policy", "readers");
        assert_eq!(sim.call(delete.clone()).await.status, StatusCode::OK);
        assert_eq!(sim.call(delete).await.status, StatusCode::NOT_FOUND);
        assert_eq!(sim.call(get).await.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_attach_policy_needs_user_in_caller_org() {
        let sim = Sim::new();
        let admin = sim.admin().await;
        let content = json!({ "Version": "2012-10-17", "Statement": [] });
        let create = op("createS3Policy", &admin)
            .with_body(json!({ "policy_name": "writers", "policy_file_content": content }));
        assert_eq!(sim.call(create).await.status, StatusCode::OK);

        // "acme-admin" exists, but only in acme.
        create_org(&sim, &admin, "acme").await;
        let attach = op("attachS3Policy", &admin)
            .with_body(json!({ "policy_name": "writers", "user_name": "acme-admin" }));
        let missing = sim.call(attach.clone()).await;
        assert_eq!(missing.status, StatusCode::NOT_FOUND);
        assert_eq!(missing.body["message"], "user 'acme-admin' not found");

        let org_admin = sim.session("acme-admin", "secret", Some("acme")).await;
        assert_eq!(sim.call(attach.with_auth(org_admin)).await.status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_containers_and_processes() {
        let sim = Sim::new();
        let admin = sim.admin().await;
        let add = op("addContainer", &admin)
            .with_body(json!({ "container_name": "client-0", "ip": "10.0.0.10" }));

        let added = sim.call(add.clone()).await;
        let data = &added.body["data"];
        assert_eq!(data["status"], "UP");
        assert_eq!(data["ips"], json!(["10.0.0.10"]));
        let uid = data["uid"].as_str().unwrap().to_owned();
        assert_eq!(sim.call(add).await.status, StatusCode::BAD_REQUEST);

        let processes = sim.call(op("getProcesses", &admin)).await;
        let processes = processes.body["data"].as_array().unwrap().clone();
        assert_eq!(processes.len(), 2);
        let management = processes.iter().filter(|p| p["roles"] == json!(["MANAGEMENT"])).count();
        assert_eq!(management, 1);

        sim.call(op("deactivateContainer", &admin).with_path_param("uid", uid.clone())).await;
        let container =
            sim.call(op("getSingleContainer", &admin).with_path_param("uid", uid.clone())).await;
        assert_eq!(container.body["data"]["status"], "DOWN");
        let processes = sim.call(op("getProcesses", &admin)).await;
        assert!(processes.body["data"].as_array().unwrap().iter().all(|p| p["status"] == "DOWN"));

        sim.call(op("removeContainer", &admin).with_path_param("uid", uid.clone())).await;
        assert_eq!(sim.backend.resource_counts().processes, 0);
        let missing = sim.call(op("getSingleContainer", &admin).with_path_param("uid", uid)).await;
        assert_eq!(missing.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_cluster_status() {
        let sim = Sim::new();
        let admin = sim.admin().await;
        let status = sim.call(op("getClusterStatus", &admin)).await;
        assert_eq!(status.body["data"]["status"], "OK");
    }

    #[tokio::test]
    async fn test_unknown_token_organization_is_fault() {
        let sim = Sim::new();
        let ghost = AuthContext {
            subject: "nobody".to_owned(),
            organization: "no-such-org".to_owned(),
            permissions: Role::ClusterAdmin.scopes(),
        };
        let result = sim.backend.handle(&op("getFileSystems", &ghost)).await;
        assert!(matches!(result, Err(HarnessError::BackendFault { .. })));
    }

    #[tokio::test]
    async fn test_unknown_operation_is_fault() {
        let sim = Sim::new();
        let result = sim.backend.handle(&OperationCall::new("launchRocket")).await;
        assert!(matches!(result, Err(HarnessError::BackendFault { .. })));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_creates_are_linearized() {
        let sim = Arc::new(Sim::new());
        let admin = sim.admin().await;

        let mut tasks = JoinSet::new();
        for _ in 0..20 {
            let sim = Arc::clone(&sim);
            let admin = admin.clone();
            tasks.spawn(async move { create_fs(&sim, &admin, "contended").await.status });
        }
        let statuses = tasks.join_all().await;
        assert_eq!(statuses.iter().filter(|s| **s == StatusCode::OK).count(), 1);
        assert_eq!(statuses.iter().filter(|s| **s == StatusCode::BAD_REQUEST).count(), 19);
        assert_eq!(sim.backend.resource_counts().file_systems, 1);
    }
}
