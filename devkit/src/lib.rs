/*!
# Parkwatch DevKit - Stubs et Utilitaires pour Développement

Bibliothèque facilitant le développement et les tests du client parkwatch:
- Transport simulé (connector + sessions scriptées), sans serveur
- Builders de messages serveur
- Harness de test autour d'un client en cours d'exécution
*/

pub mod message_builder;
pub mod mock_transport;
pub mod test_utils;

pub use message_builder::ParkingMessageBuilder;
pub use mock_transport::{MockConnector, MockPeer, MockSession};
pub use test_utils::TestHarness;
