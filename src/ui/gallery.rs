/// Original/colorized side-by-side panel

use iced::widget::image::Handle;
use iced::widget::{button, column, container, row, text, Image};
use iced::alignment::Horizontal;
use iced::{Alignment, Element, Length};

use crate::imaging::{CodecError, EncodedImage};
use crate::state::{PresentationView, RequestId};
use crate::Message;

/// Display handles for the images of one run
///
/// Built once per completed run so the textures are not re-uploaded on
/// every redraw.
#[derive(Debug, Clone, Default)]
pub struct Gallery {
    pub request_id: Option<RequestId>,
    original: Option<Handle>,
    colorized: Option<Handle>,
    /// Kept for saving to disk
    colorized_data: Option<EncodedImage>,
}

impl Gallery {
    pub fn from_view(view: &PresentationView) -> Result<Self, CodecError> {
        let handle = |image: &EncodedImage| image.payload_bytes().map(|bytes| Handle::from_bytes(bytes));

        Ok(Self {
            request_id: view.request_id,
            original: view.original_image.as_ref().map(handle).transpose()?,
            colorized: view.colorized_image.as_ref().map(handle).transpose()?,
            colorized_data: view.colorized_image.clone(),
        })
    }

    pub fn has_images(&self) -> bool {
        self.original.is_some() || self.colorized.is_some()
    }

    pub fn has_colorized(&self) -> bool {
        self.colorized.is_some()
    }

    pub fn colorized_data(&self) -> Option<&EncodedImage> {
        self.colorized_data.as_ref()
    }

    pub fn view(&self) -> Element<Message> {
        let header = row![
            text("Images").size(22),
            container(button("Close").on_press(Message::HideImages))
                .width(Length::Fill)
                .align_x(Horizontal::Right),
        ]
        .align_y(Alignment::Center);

        let mut panels = row![].spacing(16);

        if let Some(original) = &self.original {
            panels = panels.push(
                column![
                    text("Original (1950s)").size(18),
                    Image::<Handle>::new(original.clone()).width(Length::Fill),
                ]
                .spacing(12)
                .width(Length::FillPortion(1)),
            );
        }

        if let Some(colorized) = &self.colorized {
            panels = panels.push(
                column![
                    row![
                        text("Colorized (AI)").size(18).width(Length::Fill),
                        button("Download").on_press(Message::SaveColorized),
                    ]
                    .align_y(Alignment::Center),
                    Image::<Handle>::new(colorized.clone()).width(Length::Fill),
                ]
                .spacing(12)
                .width(Length::FillPortion(1)),
            );
        }

        column![header, panels]
            .spacing(16)
            .padding(24)
            .width(Length::Fill)
            .height(Length::Fill)
            .into()
    }
}
