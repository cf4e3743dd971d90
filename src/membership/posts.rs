use super::MembershipService;
use crate::error::{ServiceError, ServiceResult};
use crate::models::*;
use crate::store::{posts, spaces};

impl MembershipService {
    /// Post into a space; only active members of an active space may post
    pub fn create_post(&self, space_id: &str, author_id: &str, content: &str) -> ServiceResult<SpacePost> {
        let now = self.clock.now();
        self.store.transaction(|tx| {
            let space = spaces::get_space(tx, space_id)?;
            if !space.is_active() {
                return Err(ServiceError::Conflict(format!("Space {} is archived", space_id)));
            }
            match spaces::find_member(tx, space_id, author_id)? {
                Some(m) if m.status == MemberStatus::Active => {}
                _ => {
                    return Err(ServiceError::Forbidden(format!(
                        "User {} is not an active member of space {}",
                        author_id, space_id
                    )))
                }
            }

            let mut post = SpacePost {
                id: String::new(),
                space_id: space_id.to_string(),
                user_id: author_id.to_string(),
                content: content.to_string(),
                status: PostStatus::Normal,
                created_at: now,
            };
            posts::insert_post(tx, &mut post)?;
            Ok(post)
        })
    }

    pub fn get_post(&self, post_id: &str) -> ServiceResult<SpacePost> {
        self.store.read(|c| Ok(posts::get_post(c, post_id)?))
    }

    /// Soft-delete a post. Only its author may delete it; deleting twice is a no-op.
    pub fn delete_post(&self, post_id: &str, actor_id: &str) -> ServiceResult<SpacePost> {
        self.store.transaction(|tx| {
            let post = posts::get_post(tx, post_id)?;
            if post.user_id != actor_id {
                return Err(ServiceError::Forbidden(
                    "only the author can delete a post".to_string(),
                ));
            }
            posts::soft_delete_post(tx, post_id)?;
            Ok(posts::get_post(tx, post_id)?)
        })
    }
}
