//! services/template_renderer.rs
//! Personalización por destinatario: nombre, links de tracking y pixel de apertura.
//!
//! Se renderiza SIEMPRE por destinatario; compartir el cuerpo entre
//! destinatarios atribuiría aperturas y clicks a la persona equivocada.

use crate::models::campaign_model::Recipient;

const NAME_PLACEHOLDER: &str = "${NAME}";
const TRACKING_TOKEN_OPEN: &str = "{{trackingUrl:";
const TRACKING_TOKEN_CLOSE: &str = "}}";

#[derive(Debug, Clone)]
pub struct TemplateRenderer {
    base_url: String,
}

impl TemplateRenderer {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn render(&self, content: &str, campaign_id: &str, recipient: &Recipient) -> String {
        let personalized = content.replace(NAME_PLACEHOLDER, &recipient.name);
        let mut html = self.rewrite_tracking_links(&personalized, campaign_id, &recipient.id);
        html.push_str(&self.open_pixel(campaign_id, &recipient.id));
        html
    }

    pub fn click_url(
        &self,
        campaign_id: &str,
        recipient_id: &str,
        link_seq: usize,
        destination: &str,
    ) -> String {
        format!(
            "{}/track/click/{}/{}/link-{}?url={}",
            self.base_url,
            campaign_id,
            recipient_id,
            link_seq,
            urlencoding::encode(destination)
        )
    }

    fn open_pixel(&self, campaign_id: &str, recipient_id: &str) -> String {
        format!(
            r#"<img src="{}/track/{}/{}" width="1" height="1" />"#,
            self.base_url, campaign_id, recipient_id
        )
    }

    /// `{{trackingUrl:<destino>}}` -> URL de redirección. El token no cruza saltos
    /// de línea; uno sin cierre en su línea queda tal cual.
    fn rewrite_tracking_links(&self, html: &str, campaign_id: &str, recipient_id: &str) -> String {
        let mut out = String::with_capacity(html.len());
        let mut rest = html;
        let mut link_seq = 0;

        while let Some(start) = rest.find(TRACKING_TOKEN_OPEN) {
            let token_end = start + TRACKING_TOKEN_OPEN.len();
            let after_open = &rest[token_end..];
            let line = after_open
                .find('\n')
                .map_or(after_open, |newline| &after_open[..newline]);

            let Some(end) = line.find(TRACKING_TOKEN_CLOSE) else {
                out.push_str(&rest[..token_end]);
                rest = after_open;
                continue;
            };

            link_seq += 1;
            out.push_str(&rest[..start]);
            out.push_str(&self.click_url(campaign_id, recipient_id, link_seq, &after_open[..end]));
            rest = &after_open[end + TRACKING_TOKEN_CLOSE.len()..];
        }

        out.push_str(rest);
        out
    }
}
