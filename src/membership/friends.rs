use super::MembershipService;
use crate::error::{ServiceError, ServiceResult};
use crate::models::*;
use crate::store::users;

impl MembershipService {
    /// Send a friend request. Each pair of users shares a single edge: repeating a request
    /// returns the existing one and a rejected edge is reopened in the new direction.
    pub fn send_friend_request(&self, sender_id: &str, receiver_id: &str) -> ServiceResult<Friend> {
        if sender_id == receiver_id {
            return Err(ServiceError::Invalid(
                "cannot send a friend request to yourself".to_string(),
            ));
        }

        let now = self.clock.now();
        self.store.transaction(|tx| {
            users::get_user(tx, sender_id)?;
            users::get_user(tx, receiver_id)?;

            match users::find_friend_edge(tx, sender_id, receiver_id)? {
                Some(edge) if edge.status == FriendStatus::Accepted => Ok(edge),
                Some(edge) if edge.status == FriendStatus::Pending => {
                    if edge.sender_id == sender_id {
                        Ok(edge)
                    } else {
                        Err(ServiceError::Conflict(format!(
                            "User {} already sent you a friend request",
                            receiver_id
                        )))
                    }
                }
                Some(edge) => {
                    users::reopen_friend_request(tx, &edge.id, sender_id, receiver_id, now)?;
                    log::info!("Friend request {} reopened by {}", edge.id, sender_id);
                    Ok(users::get_friend(tx, &edge.id)?)
                }
                None => {
                    let mut friend = Friend {
                        id: String::new(),
                        sender_id: sender_id.to_string(),
                        receiver_id: receiver_id.to_string(),
                        status: FriendStatus::Pending,
                        created_at: now,
                        updated_at: now,
                    };
                    users::insert_friend(tx, &mut friend)?;
                    log::info!("Friend request {} from {} to {}", friend.id, sender_id, receiver_id);
                    Ok(friend)
                }
            }
        })
    }

    pub fn accept_friend_request(&self, request_id: &str, actor_id: &str) -> ServiceResult<Friend> {
        self.resolve_friend_request(request_id, actor_id, FriendStatus::Accepted)
    }

    pub fn reject_friend_request(&self, request_id: &str, actor_id: &str) -> ServiceResult<Friend> {
        self.resolve_friend_request(request_id, actor_id, FriendStatus::Rejected)
    }

    fn resolve_friend_request(
        &self,
        request_id: &str,
        actor_id: &str,
        to: FriendStatus,
    ) -> ServiceResult<Friend> {
        let now = self.clock.now();
        self.store.transaction(|tx| {
            let edge = users::get_friend(tx, request_id)?;
            if edge.receiver_id != actor_id {
                return Err(ServiceError::Forbidden(
                    "only the receiver can answer a friend request".to_string(),
                ));
            }
            if edge.status == to {
                return Ok(edge);
            }
            if edge.status != FriendStatus::Pending {
                return Err(ServiceError::Conflict(format!(
                    "Friend request {} is already {}",
                    request_id, edge.status
                )));
            }
            users::resolve_friend_request(tx, request_id, to, now)?;
            log::info!("Friend request {} {}", request_id, to);
            Ok(users::get_friend(tx, request_id)?)
        })
    }

    pub fn list_friends(&self, user_id: &str) -> ServiceResult<Vec<Friend>> {
        self.store.read(|c| Ok(users::list_friends(c, user_id)?))
    }

    pub fn list_incoming_friend_requests(&self, user_id: &str) -> ServiceResult<Vec<Friend>> {
        self.store
            .read(|c| Ok(users::list_incoming_friend_requests(c, user_id)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;
    use std::sync::Arc;

    #[test]
    fn test_friend_request_lifecycle() {
        let service = MembershipService::new(Arc::new(Store::in_memory().unwrap()));
        let a = service.create_user("a", None).unwrap();
        let b = service.create_user("b", None).unwrap();

        let request = service.send_friend_request(&a.id, &b.id).unwrap();
        assert_eq!(service.send_friend_request(&a.id, &b.id).unwrap().id, request.id);
        assert!(matches!(
            service.send_friend_request(&b.id, &a.id).unwrap_err(),
            ServiceError::Conflict(_)
        ));
        assert!(matches!(
            service.accept_friend_request(&request.id, &a.id).unwrap_err(),
            ServiceError::Forbidden(_)
        ));

        service.reject_friend_request(&request.id, &b.id).unwrap();

        // b reopens the rejected edge in the other direction
        let reopened = service.send_friend_request(&b.id, &a.id).unwrap();
        assert_eq!(reopened.id, request.id);
        assert_eq!(reopened.sender_id, b.id);
        assert_eq!(reopened.status, FriendStatus::Pending);

        let accepted = service.accept_friend_request(&reopened.id, &a.id).unwrap();
        assert_eq!(accepted.status, FriendStatus::Accepted);
        assert_eq!(service.list_friends(&a.id).unwrap().len(), 1);
        assert_eq!(service.list_friends(&b.id).unwrap()[0].other_user(&b.id), a.id);
        assert!(matches!(
            service.reject_friend_request(&reopened.id, &a.id).unwrap_err(),
            ServiceError::Conflict(_)
        ));
    }
}
