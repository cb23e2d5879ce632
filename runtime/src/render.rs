//! Plain-text guest messages.
//!
//! Templates exist in French and English; any other language falls back to
//! English.

use tablebook_core::notification::{
    DeliveryFailure, NotificationJob, NotificationKind, NotificationPayload, OutboundMessage,
};
use tablebook_core::types::Service;

/// Error code for jobs that have nowhere to go.
pub const NO_RECIPIENT: &str = "NO_RECIPIENT";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Lang {
    Fr,
    En,
}

impl Lang {
    fn from_code(code: &str) -> Self {
        if code.eq_ignore_ascii_case("fr") {
            Self::Fr
        } else {
            Self::En
        }
    }
}

/// Renders notification jobs into outbound messages.
#[derive(Clone, Debug)]
pub struct MessageRenderer {
    restaurant_name: String,
    base_url: String,
}

impl MessageRenderer {
    /// Renderer signing as `restaurant_name`, linking to `base_url`.
    #[must_use]
    pub fn new(restaurant_name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            restaurant_name: restaurant_name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Self-service link for a token.
    #[must_use]
    pub fn manage_link(&self, token: &str) -> String {
        format!("{}/manage/{token}", self.base_url)
    }

    /// Render a job.
    ///
    /// # Errors
    ///
    /// A [`DeliveryFailure`] with [`NO_RECIPIENT`] when the guest left no address.
    pub fn render(&self, job: &NotificationJob) -> Result<OutboundMessage, DeliveryFailure> {
        let payload = &job.payload;
        let recipient = payload
            .recipient
            .clone()
            .filter(|r| !r.trim().is_empty())
            .ok_or_else(|| DeliveryFailure::new(NO_RECIPIENT))?;

        let lang = Lang::from_code(&payload.language);
        let subject = self.subject(job.kind, lang);
        let body = self.body(job.kind, lang, payload);

        Ok(OutboundMessage {
            recipient,
            subject,
            body,
        })
    }

    fn subject(&self, kind: NotificationKind, lang: Lang) -> String {
        let headline = match (kind, lang) {
            (NotificationKind::ReservationConfirmed, Lang::Fr) => "Réservation confirmée",
            (NotificationKind::ReservationConfirmed, Lang::En) => "Reservation confirmed",
            (NotificationKind::ReservationPending, Lang::Fr) => "Demande de réservation reçue",
            (NotificationKind::ReservationPending, Lang::En) => "Reservation request received",
            (NotificationKind::ReservationUpdated, Lang::Fr) => "Réservation modifiée",
            (NotificationKind::ReservationUpdated, Lang::En) => "Reservation updated",
            (NotificationKind::ReservationCancelled, Lang::Fr) => "Réservation annulée",
            (NotificationKind::ReservationCancelled, Lang::En) => "Reservation cancelled",
            (NotificationKind::ReservationRefused, Lang::Fr) => "Réservation non acceptée",
            (NotificationKind::ReservationRefused, Lang::En) => "Reservation declined",
        };
        format!("{headline} - {}", self.restaurant_name)
    }

    fn body(&self, kind: NotificationKind, lang: Lang, payload: &NotificationPayload) -> String {
        let slot = &payload.slot_key;
        let (greeting, when, guests) = match lang {
            Lang::Fr => (
                format!("Bonjour {},", payload.guest_name),
                format!(
                    "le {} ({}) à {}",
                    slot.date().format("%d/%m/%Y"),
                    match slot.service() {
                        Service::Lunch => "déjeuner",
                        Service::Dinner => "dîner",
                    },
                    slot.time_key()
                ),
                format!("{} personne(s)", payload.party_size),
            ),
            Lang::En => (
                format!("Hello {},", payload.guest_name),
                format!("on {} ({}) at {}", slot.date_key(), slot.service(), slot.time_key()),
                format!("{} guest(s)", payload.party_size),
            ),
        };

        let line = match (kind, lang) {
            (NotificationKind::ReservationConfirmed, Lang::Fr) => {
                format!("Votre table pour {guests} est confirmée {when}.")
            },
            (NotificationKind::ReservationConfirmed, Lang::En) => {
                format!("Your table for {guests} is confirmed {when}.")
            },
            (NotificationKind::ReservationPending, Lang::Fr) => format!(
                "Nous avons bien reçu votre demande pour {guests} {when}. Nous revenons vers vous rapidement."
            ),
            (NotificationKind::ReservationPending, Lang::En) => format!(
                "We received your request for {guests} {when}. We will get back to you shortly."
            ),
            (NotificationKind::ReservationUpdated, Lang::Fr) => {
                format!("Votre réservation a été modifiée : {guests} {when}.")
            },
            (NotificationKind::ReservationUpdated, Lang::En) => {
                format!("Your reservation was updated: {guests} {when}.")
            },
            (NotificationKind::ReservationCancelled, Lang::Fr) => {
                format!("Votre réservation {when} est annulée.")
            },
            (NotificationKind::ReservationCancelled, Lang::En) => {
                format!("Your reservation {when} has been cancelled.")
            },
            (NotificationKind::ReservationRefused, Lang::Fr) => format!(
                "Nous sommes désolés, nous ne pouvons pas accueillir {guests} {when}."
            ),
            (NotificationKind::ReservationRefused, Lang::En) => {
                format!("We are sorry, we cannot host {guests} {when}.")
            },
        };

        let mut body = format!("{greeting}\n\n{line}\n");
        let offers_link = matches!(
            kind,
            NotificationKind::ReservationConfirmed
                | NotificationKind::ReservationPending
                | NotificationKind::ReservationUpdated
        );
        if let (true, Some(token)) = (offers_link, payload.manage_token.as_deref()) {
            let label = match lang {
                Lang::Fr => "Gérer ou annuler votre réservation",
                Lang::En => "Manage or cancel your reservation",
            };
            body.push_str(&format!("\n{label} : {}\n", self.manage_link(token)));
        }
        body.push_str(&format!("\n{}\n", self.restaurant_name));
        body
    }
}
