use serde::Serialize;

use super::space_ops::create_space_in;
use super::MembershipService;
use crate::error::{ServiceError, ServiceResult};
use crate::models::*;
use crate::store::{spaces, users};

/// Result of accepting a couple request
#[derive(Debug, Clone, Serialize)]
pub struct CoupleAcceptance {
    pub couple: Couple,
    pub space: Space,
    pub space_created: bool,
}

impl MembershipService {
    pub fn send_couple_request(&self, requester_id: &str, partner_id: &str) -> ServiceResult<Couple> {
        if requester_id == partner_id {
            return Err(ServiceError::Invalid(
                "cannot send a couple request to yourself".to_string(),
            ));
        }

        let now = self.clock.now();
        let (couple, created) = self.store.transaction(|tx| {
            for user_id in [requester_id, partner_id] {
                let user = users::get_user(tx, user_id)?;
                if !user.is_single() {
                    return Err(ServiceError::Conflict(format!(
                        "User {} is already in a relationship",
                        user_id
                    )));
                }
            }
            if users::find_pending_couple(tx, partner_id, requester_id)?.is_some() {
                return Err(ServiceError::Conflict(format!(
                    "User {} already sent you a couple request",
                    partner_id
                )));
            }
            if let Some(existing) = users::find_pending_couple(tx, requester_id, partner_id)? {
                return Ok((existing, false));
            }

            let mut couple = Couple {
                id: String::new(),
                requester_id: requester_id.to_string(),
                partner_id: partner_id.to_string(),
                status: CoupleStatus::Pending,
                created_at: now,
                updated_at: now,
            };
            users::insert_couple(tx, &mut couple)?;
            Ok((couple, true))
        })?;

        if created {
            log::info!("Couple request {} from {} to {}", couple.id, requester_id, partner_id);
        }
        Ok(couple)
    }

    /// Accept a couple request: pair both users and make sure an active couple space holds
    /// them both, creating one if needed. All of it commits or none of it does.
    pub fn accept_couple_request(&self, couple_id: &str) -> ServiceResult<CoupleAcceptance> {
        let now = self.clock.now();
        let default_interval = self.default_check_in_interval;

        let acceptance = self.store.transaction(|tx| {
            let couple = users::get_couple(tx, couple_id)?;
            let (a, b) = (couple.requester_id.as_str(), couple.partner_id.as_str());

            match couple.status {
                CoupleStatus::Rejected => {
                    return Err(ServiceError::Conflict(format!(
                        "Couple request {} was rejected",
                        couple_id
                    )))
                }
                CoupleStatus::Accepted => {
                    return match spaces::shared_couple_space(tx, a, b)? {
                        Some(space) => Ok(CoupleAcceptance {
                            couple: couple.clone(),
                            space,
                            space_created: false,
                        }),
                        None => Err(ServiceError::Conflict(format!(
                            "Couple request {} was already accepted",
                            couple_id
                        ))),
                    };
                }
                CoupleStatus::Pending => {}
            }

            let requester = users::get_user(tx, a)?;
            let partner = users::get_user(tx, b)?;
            for (user, other) in [(&requester, b), (&partner, a)] {
                if !user.is_single() && !user.is_paired_with(other) {
                    return Err(ServiceError::Conflict(format!(
                        "User {} is already in another relationship",
                        user.id
                    )));
                }
            }

            if users::resolve_couple(tx, couple_id, CoupleStatus::Accepted, now)? == 0 {
                return Err(ServiceError::Conflict(format!(
                    "Couple request {} is no longer pending",
                    couple_id
                )));
            }
            users::set_partner(tx, a, Some(b), now)?;
            users::set_partner(tx, b, Some(a), now)?;

            let (space, space_created) = match spaces::shared_couple_space(tx, a, b)? {
                Some(space) => (space, false),
                None => {
                    let name = format!("{} & {}", requester.display_name, partner.display_name);
                    let space = create_space_in(
                        tx,
                        &name,
                        SpaceType::Couple,
                        a,
                        Some(b),
                        default_interval,
                        now,
                    )?;
                    (space, true)
                }
            };

            Ok(CoupleAcceptance {
                couple: users::get_couple(tx, couple_id)?,
                space,
                space_created,
            })
        })?;

        log::info!(
            "Couple {} accepted; space {} (created: {})",
            acceptance.couple.id,
            acceptance.space.id,
            acceptance.space_created
        );
        Ok(acceptance)
    }

    pub fn reject_couple_request(&self, couple_id: &str) -> ServiceResult<Couple> {
        let now = self.clock.now();
        self.store.transaction(|tx| {
            let couple = users::get_couple(tx, couple_id)?;
            match couple.status {
                CoupleStatus::Rejected => Ok(couple),
                CoupleStatus::Accepted => Err(ServiceError::Conflict(format!(
                    "Couple request {} was already accepted",
                    couple_id
                ))),
                CoupleStatus::Pending => {
                    users::resolve_couple(tx, couple_id, CoupleStatus::Rejected, now)?;
                    log::info!("Couple request {} rejected", couple_id);
                    Ok(users::get_couple(tx, couple_id)?)
                }
            }
        })
    }

    pub fn get_couple(&self, couple_id: &str) -> ServiceResult<Couple> {
        self.store.read(|c| Ok(users::get_couple(c, couple_id)?))
    }

    pub fn list_incoming_couple_requests(&self, user_id: &str) -> ServiceResult<Vec<Couple>> {
        self.store.read(|c| Ok(users::list_incoming_couples(c, user_id)?))
    }
}
