pub mod mock_pulsoid;
