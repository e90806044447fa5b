use crate::error::CrowdfundError;
use std::collections::HashSet;
use uuid::Uuid;

/// One-time capability redeemable for the `contribute` operation.
///
/// Invitations are deliberately not `Clone`: redemption consumes the handle
/// by move, and the engine additionally checks the handle against its
/// issued-set so a forged or stale handle fails with `UnknownInvitation`.
#[derive(Debug)]
pub struct ContributeInvitation(pub(crate) Uuid);

/// One-time capability redeemable for the `pledge` operation.
#[derive(Debug)]
pub struct PledgeInvitation(pub(crate) Uuid);

/// One-time capability redeemable for `register_beneficiary`.
#[derive(Debug)]
pub struct BeneficiaryInvitation(pub(crate) Uuid);

/// One-time capability redeemable for one `claim`/`settle` attempt.
///
/// A failed attempt (gate not satisfied) consumes the invitation; the
/// holder of the `ClaimRight` simply makes another one and retries.
#[derive(Debug)]
pub struct ClaimInvitation(pub(crate) Uuid);

/// Issued-set backing every outstanding invitation.
#[derive(Debug, Default)]
pub struct InvitationBook {
    issued: HashSet<Uuid>,
}

impl InvitationBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn issue(&mut self) -> Uuid {
        let id = Uuid::new_v4();
        self.issued.insert(id);
        id
    }

    /// Burn an invitation id at redemption time.
    pub(crate) fn redeem(&mut self, id: Uuid) -> Result<(), CrowdfundError> {
        if !self.issued.remove(&id) {
            return Err(CrowdfundError::UnknownInvitation);
        }
        Ok(())
    }
}
